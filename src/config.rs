//! Environment-variable configuration (§6.5).
//!
//! Only the variables this subsystem recognizes are parsed here; TOML
//! config-file loading is explicitly out of scope (§1 Non-goals) — this
//! crate's "config layer" is exactly this env var table.

use tracing::warn;

/// Credit cap clamp, §3.4 / §6.5.
pub const FRAMES_IN_FLIGHT_MIN: u32 = 1;
pub const FRAMES_IN_FLIGHT_MAX: u32 = 16;
pub const FRAMES_IN_FLIGHT_DEFAULT: u32 = 2;

/// Per-pass output buffer clamp, §3.4 / §6.5.
pub const MAX_COMPRESSED_BYTES_MIN: u32 = 64 * 1024;
pub const MAX_COMPRESSED_BYTES_MAX: u32 = 256 * 1024 * 1024;
pub const MAX_COMPRESSED_BYTES_DEFAULT: u32 = 3 * 1024 * 1024;

/// Fixed header reserve ahead of every [`crate::queue::EncResult::comp_pad_data`] (§3.3).
pub const PAD_BYTES: usize = 256;

/// MS-RDPEGFX metablock rect limit (§4.4, §8).
pub const MAX_METABLOCK_RECTS: usize = 15;

/// Maximum accepted rect-array length on any wire path (§8 Boundary
/// behaviors: accept up to and including `16·1024`, reject above it).
pub const MAX_RECTS: usize = 16 * 1024;

/// Read `XRDP_GFX_FRAMES_IN_FLIGHT`, clamped to `[1, 16]`, defaulting to 2
/// on anything that doesn't parse as an integer in range.
pub fn frames_in_flight_from_env() -> u32 {
    read_clamped_u32(
        "XRDP_GFX_FRAMES_IN_FLIGHT",
        FRAMES_IN_FLIGHT_MIN,
        FRAMES_IN_FLIGHT_MAX,
        FRAMES_IN_FLIGHT_DEFAULT,
    )
}

/// Read `XRDP_GFX_MAX_COMPRESSED_BYTES`, clamped to `[64 KiB, 256 MiB]`,
/// defaulting to 3 MiB.
pub fn max_compressed_bytes_from_env() -> u32 {
    read_clamped_u32(
        "XRDP_GFX_MAX_COMPRESSED_BYTES",
        MAX_COMPRESSED_BYTES_MIN,
        MAX_COMPRESSED_BYTES_MAX,
        MAX_COMPRESSED_BYTES_DEFAULT,
    )
}

fn read_clamped_u32(var: &str, min: u32, max: u32, default: u32) -> u32 {
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse::<u32>() {
            Ok(value) if (min..=max).contains(&value) => value,
            Ok(value) => {
                warn!(
                    "{var}={value} out of range [{min}, {max}], using default {default}"
                );
                default
            }
            Err(_) => {
                warn!("{var}={raw:?} is not an integer, using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

/// NVENC rate-control mode, selected via `XRDP_NVENC_RATE_CONTROL_MODE` (§4.8, §6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvencRateControl {
    /// Constant QP across I/P/B frames.
    ConstQp(u8),
    /// Variable bitrate targeting an average bitrate in bits/sec.
    Vbr(u32),
}

impl Default for NvencRateControl {
    fn default() -> Self {
        Self::ConstQp(28)
    }
}

impl NvencRateControl {
    /// Parse `XRDP_NVENC_RATE_CONTROL_MODE` plus its companion
    /// `XRDP_NVENC_QP` / `XRDP_NVENC_AVERAGE_BITRATE` variable.
    /// Falls back to the documented default (CQP, qp=28) on any
    /// unrecognized or out-of-range value.
    pub fn from_env() -> Self {
        match std::env::var("XRDP_NVENC_RATE_CONTROL_MODE").as_deref() {
            Ok("NV_ENC_PARAMS_RC_CONSTQP") => {
                let qp = std::env::var("XRDP_NVENC_QP")
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok())
                    .filter(|qp| *qp <= 51)
                    .unwrap_or_else(|| {
                        warn!("XRDP_NVENC_QP missing or out of [0,51], using default 28");
                        28
                    });
                Self::ConstQp(qp as u8)
            }
            Ok("NV_ENC_PARAMS_RC_VBR") => {
                let bitrate = std::env::var("XRDP_NVENC_AVERAGE_BITRATE")
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok())
                    .filter(|b| (5_000..=1_000_000_000).contains(b));
                match bitrate {
                    Some(bitrate) => Self::Vbr(bitrate),
                    None => {
                        warn!("XRDP_NVENC_AVERAGE_BITRATE missing or out of range, using default CQP");
                        Self::default()
                    }
                }
            }
            _ => Self::default(),
        }
    }
}

/// Log level for the accel-assist binary, via `XRDP_ACCEL_ASSIST_LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Always,
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn from_env() -> Self {
        match std::env::var("XRDP_ACCEL_ASSIST_LOG_LEVEL").as_deref() {
            Ok("LOG_LEVEL_ALWAYS") => Self::Always,
            Ok("LOG_LEVEL_ERROR") => Self::Error,
            Ok("LOG_LEVEL_WARNING") => Self::Warning,
            Ok("LOG_LEVEL_INFO") => Self::Info,
            Ok("LOG_LEVEL_DEBUG") => Self::Debug,
            Ok("LOG_LEVEL_TRACE") => Self::Trace,
            Ok(other) => {
                warn!("unrecognized XRDP_ACCEL_ASSIST_LOG_LEVEL={other:?}, using INFO");
                Self::Info
            }
            Err(_) => Self::Info,
        }
    }

    pub fn as_env_filter(&self) -> &'static str {
        match self {
            Self::Always | Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

/// Resolve the accel-assist log file path per §6.5: `XRDP_ACCEL_ASSIST_LOG_PATH`,
/// then `XDG_DATA_HOME`, then `HOME`, disambiguated by the `DISPLAY` number.
pub fn resolve_log_path() -> std::path::PathBuf {
    let display_num = std::env::var("DISPLAY")
        .ok()
        .and_then(|d| {
            d.trim_start_matches(':')
                .split(['.', ':'])
                .next()
                .and_then(|s| s.parse::<u32>().ok())
        })
        .unwrap_or(0);
    let file_name = format!("xrdp-accel-assist.{display_num}.log");

    if let Ok(explicit) = std::env::var("XRDP_ACCEL_ASSIST_LOG_PATH") {
        return std::path::PathBuf::from(explicit);
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return std::path::PathBuf::from(xdg).join(&file_name);
    }
    if let Ok(home) = std::env::var("HOME") {
        return std::path::PathBuf::from(home)
            .join(".local/share")
            .join(&file_name);
    }
    std::path::PathBuf::from("/tmp").join(file_name)
}
