//! Configuration parameters struct parsing helper.

/// Composes a configuration struct from its default values, then overwrites
/// given fields by parsing from given TOML string if it's not `None`. Returns
/// an `Ok(config)` on success, and `Err(ChainKvError)` on parser failure.
///
/// Example:
/// ```no_run
/// use chainkv::{parsed_config, ChainKvError, ClusterConfig};
/// fn build(config_str: Option<&str>) -> Result<(), ChainKvError> {
///     let config = parsed_config!(config_str => ClusterConfig; pool_size)?;
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        // closure helper for easier error returning
        let compose_config = || -> Result<$config_type, ChainKvError> {
            let mut config: $config_type = Default::default();
            if config_str.is_none() {
                return Ok(config);
            }

            let mut table = config_str.unwrap().parse::<toml::Table>()?;

            // traverse through all given field names
            $({
                // if field name found in table (and removed)
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // if table is not empty at this time, some parsed keys are not
            // expected hence invalid
            if !table.is_empty() {
                return Err(ChainKvError(format!(
                    "invalid field name '{}' in config",
                    table.keys().next().unwrap(),
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}

#[cfg(test)]
mod config_tests {
    use crate::utils::ChainKvError;

    #[derive(Debug, PartialEq)]
    struct TestConfig {
        cap: usize,
        tail: String,
        frac: f64,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            TestConfig {
                cap: 32,
                tail: "d".into(),
                frac: 0.5,
            }
        }
    }

    #[test]
    fn parse_from_none() -> Result<(), ChainKvError> {
        let config = parsed_config!(None => TestConfig; cap, tail, frac)?;
        let ref_config: TestConfig = Default::default();
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_from_partial() -> Result<(), ChainKvError> {
        let config_str = Some("tail = 'c'");
        let config = parsed_config!(config_str => TestConfig; tail, frac)?;
        let ref_config = TestConfig {
            cap: 32,
            tail: "c".into(),
            frac: 0.5,
        };
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_invalid_field() {
        let config_str = Some("nonsense = 999");
        assert!(parsed_config!(config_str => TestConfig; cap).is_err());
    }
}
