// Explicit configuration, replacing the source's global console-variable
// registry (`RX_CONSOLE_IVAR`) with a plain struct passed into `Backend::new`.
//
// Austin Shafer - 2024

use std::env;

/// Tunable knobs read by the render graph core.
///
/// Each field corresponds to one console variable in the source material.
/// There is no registry and no string-keyed lookup at runtime - a caller
/// builds one `Config`, hands it to `Backend::new`, and it is never mutated
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// `r.MaxInFlightGpuFrames` - number of frame records the scheduler
    /// keeps in flight (K in the invariants). Range 1..=8.
    pub max_in_flight_gpu_frames: u32,
    /// `r.EnableGpuValidation` - install the Vulkan debug-utils messenger.
    pub enable_gpu_validation: bool,
    /// `r.BreakOnValidationError` - abort the process as soon as the
    /// validation layer reports an error, rather than only logging it.
    pub break_on_validation_error: bool,
    /// `fluidSim.numPressureIterations` - Jacobi iteration count for the
    /// fluid pass's pressure solve. Range 1..=32.
    pub fluid_sim_num_pressure_iterations: u32,
    /// `fluidSim.maxFluidVolumes` - hard cap on the number of fluid volumes
    /// simulated in a single frame. The source hard-codes this as
    /// `MAX_NUM_FLUID_VOLUMES`; this crate exposes it the same way it
    /// exposes every other tunable.
    pub fluid_sim_max_fluid_volumes: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_in_flight_gpu_frames: 3,
            enable_gpu_validation: false,
            break_on_validation_error: false,
            fluid_sim_num_pressure_iterations: 10,
            fluid_sim_max_fluid_volumes: 64,
        }
    }
}

impl Config {
    /// Clamp every field into its documented range. `Backend::new` calls
    /// this so an out-of-range value from `from_env` can't silently produce
    /// undefined behaviour downstream (e.g. a zero-sized frame ring).
    pub fn sanitized(mut self) -> Self {
        self.max_in_flight_gpu_frames = self.max_in_flight_gpu_frames.clamp(1, 8);
        self.fluid_sim_num_pressure_iterations = self.fluid_sim_num_pressure_iterations.clamp(1, 32);
        self.fluid_sim_max_fluid_volumes = self.fluid_sim_max_fluid_volumes.clamp(1, 4096);
        self
    }

    /// Overlay values found in the environment on top of `Config::default()`.
    ///
    /// This is intentionally not a generic config-file parser: one named
    /// knob, one type, one default, one range, matching the console-var
    /// style it replaces.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_u32("RENDER_GRAPH_MAX_IN_FLIGHT_GPU_FRAMES") {
            cfg.max_in_flight_gpu_frames = v;
        }
        if let Some(v) = env_bool("RENDER_GRAPH_ENABLE_GPU_VALIDATION") {
            cfg.enable_gpu_validation = v;
        }
        if let Some(v) = env_bool("RENDER_GRAPH_BREAK_ON_VALIDATION_ERROR") {
            cfg.break_on_validation_error = v;
        }
        if let Some(v) = env_u32("RENDER_GRAPH_FLUIDSIM_NUM_PRESSURE_ITERATIONS") {
            cfg.fluid_sim_num_pressure_iterations = v;
        }
        if let Some(v) = env_u32("RENDER_GRAPH_FLUIDSIM_MAX_FLUID_VOLUMES") {
            cfg.fluid_sim_max_fluid_volumes = v;
        }

        cfg.sanitized()
    }
}

fn env_u32(name: &str) -> Option<u32> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| match v.as_str() {
        "1" | "true" | "TRUE" | "on" => Some(true),
        "0" | "false" | "FALSE" | "off" => Some(false),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_in_flight_gpu_frames, 3);
        assert_eq!(cfg.enable_gpu_validation, false);
        assert_eq!(cfg.break_on_validation_error, false);
        assert_eq!(cfg.fluid_sim_num_pressure_iterations, 10);
        assert_eq!(cfg.fluid_sim_max_fluid_volumes, 64);
    }

    #[test]
    fn sanitized_clamps_out_of_range_values() {
        let cfg = Config {
            max_in_flight_gpu_frames: 99,
            enable_gpu_validation: false,
            break_on_validation_error: false,
            fluid_sim_num_pressure_iterations: 0,
            fluid_sim_max_fluid_volumes: 0,
        }
        .sanitized();

        assert_eq!(cfg.max_in_flight_gpu_frames, 8);
        assert_eq!(cfg.fluid_sim_num_pressure_iterations, 1);
        assert_eq!(cfg.fluid_sim_max_fluid_volumes, 1);
    }
}
