use std::str::FromStr;

use skein_bus::SocketOptions;
use strum_macros::{AsRefStr, EnumIter, EnumString};

use crate::error::{PluginError, PluginResult};

/// Tuning knobs a script can set on any socket by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumIter, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum SocketOption {
    LingerPeriod,
    Backlog,
    ReadTimeout,
    WriteTimeout,
    Immediate,
    Conflate,
    #[strum(serialize = "readHWM")]
    ReadHwm,
    #[strum(serialize = "writeHWM")]
    WriteHwm,
}

impl SocketOption {
    pub fn parse(name: &str) -> PluginResult<Self> {
        Self::from_str(name).map_err(|_| PluginError::InvalidOption(name.to_string()))
    }

    /// Store `value` into `options`
    ///
    /// Durations are milliseconds, where a negative value means wait forever.
    /// Counts clamp negative values to zero and flags treat any non-zero value as on.
    pub fn apply(self, options: &mut SocketOptions, value: i64) {
        let count = usize::try_from(value.max(0)).unwrap_or(usize::MAX);
        match self {
            SocketOption::LingerPeriod => options.linger_ms = value,
            SocketOption::Backlog => options.backlog = count,
            SocketOption::ReadTimeout => options.read_timeout_ms = value,
            SocketOption::WriteTimeout => options.write_timeout_ms = value,
            SocketOption::Immediate => options.immediate = value != 0,
            SocketOption::Conflate => options.conflate = value != 0,
            SocketOption::ReadHwm => options.read_hwm = count,
            SocketOption::WriteHwm => options.write_hwm = count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_option_parses_from_its_name() {
        for option in SocketOption::iter() {
            assert_eq!(SocketOption::parse(option.as_ref()).unwrap(), option);
        }
        assert_eq!(SocketOption::parse("lingerPeriod").unwrap(), SocketOption::LingerPeriod);
        assert_eq!(SocketOption::parse("readHWM").unwrap(), SocketOption::ReadHwm);
    }

    #[test]
    fn test_unknown_name_is_invalid_option() {
        for name in ["bogus", "", "ReadTimeout", "read_timeout"] {
            match SocketOption::parse(name) {
                Err(PluginError::InvalidOption(reported)) => assert_eq!(reported, name),
                other => panic!("expected InvalidOption for {name:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_apply() {
        let mut options = SocketOptions::default();
        SocketOption::ReadTimeout.apply(&mut options, 1000);
        SocketOption::Conflate.apply(&mut options, 1);
        SocketOption::Backlog.apply(&mut options, -5);
        SocketOption::WriteHwm.apply(&mut options, 7);

        assert_eq!(options.read_timeout(), Some(Duration::from_secs(1)));
        assert!(options.conflate);
        assert_eq!(options.backlog, 0);
        assert_eq!(options.write_hwm, 7);

        SocketOption::ReadTimeout.apply(&mut options, -1);
        SocketOption::Conflate.apply(&mut options, 0);
        assert_eq!(options.read_timeout(), None);
        assert!(!options.conflate);
    }
}
