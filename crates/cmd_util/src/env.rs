//! Environment-driven configuration knobs and test/tracing bootstrap.
//!
//! Every tunable in the workspace goes through [`env_config`] so it can be
//! overridden from the environment without a recompile, the same convention
//! the rest of the ambient stack uses for knobs.

use std::{
    env,
    fmt::Debug,
    str::FromStr,
};

pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// Initialize tracing for a test binary. Safe to call more than once; a
/// second initialization is ignored.
pub fn config_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}
