//! Scheduler-wide configuration.

use chrono_tz::Tz;

/// Process-level settings. The default timezone applies to every task
/// without its own override.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub timezone: Tz,
}

impl Default for Settings {
    fn default() -> Self {
        Self { timezone: Tz::UTC }
    }
}

impl Settings {
    /// Read settings from the environment. `CHIME_TZ` supplies the default
    /// timezone (IANA name, e.g. `Europe/Berlin`); unset or unrecognized
    /// values fall back to UTC.
    pub fn from_env() -> Self {
        match std::env::var("CHIME_TZ") {
            Ok(raw) => match raw.parse::<Tz>() {
                Ok(timezone) => Self { timezone },
                Err(_) => {
                    tracing::warn!(value = %raw, "Unrecognized CHIME_TZ, falling back to UTC");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn with_timezone(timezone: Tz) -> Self {
        Self { timezone }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timezone_is_utc() {
        assert_eq!(Settings::default().timezone, Tz::UTC);
    }

    #[test]
    fn explicit_timezone_is_kept() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        assert_eq!(Settings::with_timezone(tz).timezone, tz);
    }
}
