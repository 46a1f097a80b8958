use std::net::IpAddr;
use std::net::Ipv6Addr;
use std::num::NonZero;
use std::path::Path;
use std::str::FromStr as _;
use std::time::Duration;

use anyhow::Context as _;
use anyhow::bail;
use log::LevelFilter;
use serde::Deserialize;
use serde::Deserializer;

use crate::profiles::Profile;

#[macro_export]
macro_rules! nonzero {
    ($exp:expr) => {
        const {
            match NonZero::new($exp) {
                Some(v) => v,
                None => panic!("Value is zero"),
            }
        }
    };
}

pub(crate) const DEFAULT_BIND_ADDRESS: IpAddr = IpAddr::V6(Ipv6Addr::UNSPECIFIED);
pub(crate) const DEFAULT_BIND_PORT: NonZero<u16> = nonzero!(8380);
pub(crate) const DEFAULT_CONFIGURATION_PATH: &str = "/etc/mirror-steer-rs/mirror-steer-rs.conf";
pub(crate) const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;
pub(crate) const DEFAULT_PROFILE: &str = "arch";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Minimum log level severity to output.
    /// Can be overridden via program options.
    #[serde(default = "default_log_level", deserialize_with = "from_level_name")]
    pub(crate) log_level: LevelFilter,

    /// Address to listen on.
    #[serde(default = "default_bind_addr")]
    pub(crate) bind_addr: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_bind_port")]
    pub(crate) bind_port: NonZero<u16>,

    /// Timeout for outbound http operations.
    #[serde(default = "default_http_timeout", deserialize_with = "from_secs_f32")]
    pub(crate) http_timeout: Duration,

    /// Deployment profile providing the steering table and branding.
    #[serde(default = "default_profile")]
    pub(crate) profile: String,
}

fn from_level_name<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;
    let s: String = Deserialize::deserialize(deserializer)?;

    LevelFilter::from_str(&s).map_err(D::Error::custom)
}

fn from_secs_f32<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;
    let s: f32 = Deserialize::deserialize(deserializer)?;

    Duration::try_from_secs_f32(s).map_err(D::Error::custom)
}

const fn default_log_level() -> LevelFilter {
    DEFAULT_LOG_LEVEL
}

const fn default_bind_addr() -> IpAddr {
    DEFAULT_BIND_ADDRESS
}

const fn default_bind_port() -> NonZero<u16> {
    DEFAULT_BIND_PORT
}

const fn default_http_timeout() -> Duration {
    DEFAULT_HTTP_TIMEOUT
}

fn default_profile() -> String {
    DEFAULT_PROFILE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL,
            bind_addr: DEFAULT_BIND_ADDRESS,
            bind_port: DEFAULT_BIND_PORT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            profile: DEFAULT_PROFILE.to_string(),
        }
    }
}

impl Config {
    pub(crate) fn new(file: &Path) -> anyhow::Result<(Self, bool)> {
        let content = match std::fs::read_to_string(file) {
            Ok(c) => c,
            Err(err)
                if err.kind() == std::io::ErrorKind::NotFound
                    && file == Path::new(DEFAULT_CONFIGURATION_PATH) =>
            {
                return Ok((Self::default(), true));
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read file `{}`", file.display()));
            }
        };

        let config: Self = toml::from_str(&content).context("Failed to parse configuration")?;

        config.validate()?;

        Ok((config, false))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.http_timeout > Duration::from_secs(360) {
            bail!(
                "Invalid http_timeout value of {}: must be less or equal to 360s",
                self.http_timeout.as_secs_f32()
            );
        }

        if Profile::by_name(&self.profile).is_none() {
            bail!(
                "Invalid profile `{}`: expected `arch` or `debian`",
                self.profile
            );
        }

        Ok(())
    }
}
