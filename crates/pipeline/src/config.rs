//! Pipeline configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reelswap_core::polling::PollConfig;
use reelswap_core::rate_limit::{
    DEFAULT_FACESWAP_PERMITS, DEFAULT_GENERATION_PERMITS, DEFAULT_UPLOAD_PERMITS,
};
use reelswap_core::retry::RetryPolicy;
use reelswap_providers::faceswap::{FaceSwapBackend, DEFAULT_FACEFUSION_URL, PIAPI_FACESWAP_BASE_URL};
use reelswap_providers::generation::{GenerationBackend, DEFAULT_KLING_BASE_URL, PIAPI_KLING_BASE_URL};
use reelswap_providers::task::TaskClientConfig;
use reelswap_providers::temp_host::DEFAULT_TEMP_HOST_URL;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is required{context}")]
    Missing { name: &'static str, context: String },

    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Credentials for the direct Kling API.
#[derive(Clone)]
pub struct KlingCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for KlingCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KlingCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Everything the pipeline needs to talk to its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent directory of every run's work directory.
    pub work_dir: PathBuf,
    pub faceswap_backend: FaceSwapBackend,
    pub generation_backend: GenerationBackend,
    pub piapi_key: Option<String>,
    pub piapi_faceswap_url: String,
    pub piapi_generation_url: String,
    pub facefusion_url: String,
    pub kling: Option<KlingCredentials>,
    pub kling_base_url: String,
    pub temp_host_url: String,
    pub faceswap_concurrency: usize,
    pub generation_concurrency: usize,
    pub upload_concurrency: usize,
    pub generation_submit_delay: Duration,
    pub retry: RetryPolicy,
    pub swap_poll: PollConfig,
    pub generation_poll: PollConfig,
}

impl PipelineConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                       | Default                    |
    /// |-------------------------------|----------------------------|
    /// | `WORK_DIR`                    | `<tmp>/reelswap`           |
    /// | `FACESWAP_PROVIDER`           | `piapi`                    |
    /// | `GENERATION_PROVIDER`         | `piapi`                    |
    /// | `PIAPI_KEY`                   | required for piapi         |
    /// | `PIAPI_FACESWAP_URL`          | PiAPI face-swap endpoint   |
    /// | `PIAPI_GENERATION_URL`        | PiAPI Kling endpoint       |
    /// | `FACEFUSION_URL`              | `http://faceswap:8000`     |
    /// | `KLING_ACCESS_KEY`            | required for kling         |
    /// | `KLING_SECRET_KEY`            | required for kling         |
    /// | `KLING_BASE_URL`              | `https://api.klingai.com`  |
    /// | `TEMP_HOST_URL`               | `https://file.io`          |
    /// | `FACESWAP_CONCURRENCY`        | `3`                        |
    /// | `GENERATION_CONCURRENCY`      | `1`                        |
    /// | `UPLOAD_CONCURRENCY`          | `2`                        |
    /// | `GENERATION_SUBMIT_DELAY_MS`  | `3000`                     |
    /// | `RATE_LIMIT_RETRIES`          | `1`                        |
    /// | `RATE_LIMIT_DELAY_MS`         | `10000`                    |
    /// | `SWAP_POLL_ATTEMPTS`          | `15`                       |
    /// | `SWAP_POLL_INTERVAL_MS`       | `3000`                     |
    /// | `GENERATION_POLL_ATTEMPTS`    | `60`                       |
    /// | `GENERATION_POLL_INTERVAL_MS` | `10000`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let work_dir = match env.string("WORK_DIR") {
            // ffmpeg resolves concat entries against the manifest, not the cwd.
            Some(raw) => std::path::absolute(&raw).map_err(|e| ConfigError::Invalid {
                name: "WORK_DIR",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => std::env::temp_dir().join("reelswap"),
        };

        let faceswap_backend: FaceSwapBackend = env.parse("FACESWAP_PROVIDER", FaceSwapBackend::PiApi)?;
        let generation_backend: GenerationBackend =
            env.parse("GENERATION_PROVIDER", GenerationBackend::PiApi)?;

        let piapi_key = env.string("PIAPI_KEY");
        let uses_piapi = faceswap_backend == FaceSwapBackend::PiApi
            || generation_backend == GenerationBackend::PiApi;
        if uses_piapi && piapi_key.is_none() {
            return Err(ConfigError::Missing {
                name: "PIAPI_KEY",
                context: " when a piapi provider is selected".into(),
            });
        }

        let kling = match generation_backend {
            GenerationBackend::Kling => Some(KlingCredentials {
                access_key: env.required("KLING_ACCESS_KEY", " for the kling provider")?,
                secret_key: env.required("KLING_SECRET_KEY", " for the kling provider")?,
            }),
            GenerationBackend::PiApi => None,
        };

        let retry = RetryPolicy {
            max_retries: env.parse("RATE_LIMIT_RETRIES", 1u32)?,
            initial_delay: env.millis("RATE_LIMIT_DELAY_MS", 10_000)?,
            ..RetryPolicy::default()
        };
        let rate_limit_backoff = retry.initial_delay;

        let swap_poll = PollConfig {
            max_attempts: env.positive("SWAP_POLL_ATTEMPTS", 15)?,
            interval: env.millis("SWAP_POLL_INTERVAL_MS", 3_000)?,
            rate_limit_backoff,
            ..PollConfig::face_swap()
        };
        let generation_poll = PollConfig {
            max_attempts: env.positive("GENERATION_POLL_ATTEMPTS", 60)?,
            interval: env.millis("GENERATION_POLL_INTERVAL_MS", 10_000)?,
            rate_limit_backoff,
            ..PollConfig::generation()
        };

        Ok(Self {
            work_dir,
            faceswap_backend,
            generation_backend,
            piapi_key,
            piapi_faceswap_url: env
                .string("PIAPI_FACESWAP_URL")
                .unwrap_or_else(|| PIAPI_FACESWAP_BASE_URL.into()),
            piapi_generation_url: env
                .string("PIAPI_GENERATION_URL")
                .unwrap_or_else(|| PIAPI_KLING_BASE_URL.into()),
            facefusion_url: env
                .string("FACEFUSION_URL")
                .unwrap_or_else(|| DEFAULT_FACEFUSION_URL.into()),
            kling,
            kling_base_url: env
                .string("KLING_BASE_URL")
                .unwrap_or_else(|| DEFAULT_KLING_BASE_URL.into()),
            temp_host_url: env
                .string("TEMP_HOST_URL")
                .unwrap_or_else(|| DEFAULT_TEMP_HOST_URL.into()),
            faceswap_concurrency: env.positive("FACESWAP_CONCURRENCY", DEFAULT_FACESWAP_PERMITS)?,
            generation_concurrency: env
                .positive("GENERATION_CONCURRENCY", DEFAULT_GENERATION_PERMITS)?,
            upload_concurrency: env.positive("UPLOAD_CONCURRENCY", DEFAULT_UPLOAD_PERMITS)?,
            generation_submit_delay: env.millis("GENERATION_SUBMIT_DELAY_MS", 3_000)?,
            retry,
            swap_poll,
            generation_poll,
        })
    }

    pub fn face_swap_client(&self) -> TaskClientConfig {
        TaskClientConfig {
            retry: self.retry.clone(),
            poll: self.swap_poll.clone(),
            submit_delay: Duration::ZERO,
        }
    }

    pub fn generation_client(&self) -> TaskClientConfig {
        TaskClientConfig {
            retry: self.retry.clone(),
            poll: self.generation_poll.clone(),
            submit_delay: self.generation_submit_delay,
        }
    }
}

/// Typed accessors over a variable lookup. Blank values count as unset.
struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str, context: &str) -> Result<String, ConfigError> {
        self.string(name).ok_or_else(|| ConfigError::Missing {
            name,
            context: context.to_string(),
        })
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn positive<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + Copy,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(name, default)?;
        if value <= T::default() {
            return Err(ConfigError::Invalid {
                name,
                value: self.string(name).unwrap_or_default(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(value)
    }

    fn millis(&self, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(name, default).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_with_piapi_key() {
        let config = load(&[("PIAPI_KEY", "pk")]).unwrap();

        assert_eq!(config.faceswap_backend, FaceSwapBackend::PiApi);
        assert_eq!(config.generation_backend, GenerationBackend::PiApi);
        assert_eq!(config.work_dir, std::env::temp_dir().join("reelswap"));
        assert_eq!(config.temp_host_url, "https://file.io");
        assert_eq!(
            (config.faceswap_concurrency, config.generation_concurrency, config.upload_concurrency),
            (3, 1, 2)
        );
        assert_eq!(config.generation_submit_delay, Duration::from_secs(3));
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.swap_poll.max_attempts, 15);
        assert_eq!(config.swap_poll.interval, Duration::from_secs(3));
        assert_eq!(config.generation_poll.max_attempts, 60);
        assert_eq!(config.generation_poll.interval, Duration::from_secs(10));
        assert_eq!(config.generation_poll.rate_limit_backoff, Duration::from_secs(10));
    }

    #[test]
    fn relative_work_dir_is_made_absolute() {
        let config = load(&[("PIAPI_KEY", "pk"), ("WORK_DIR", "./work")]).unwrap();

        assert!(config.work_dir.is_absolute());
        assert!(config.work_dir.ends_with("work"));
        assert!(config.work_dir.starts_with(std::env::current_dir().unwrap()));
    }

    #[test]
    fn piapi_key_is_required_for_piapi_backends() {
        assert_matches!(
            load(&[]),
            Err(ConfigError::Missing { name: "PIAPI_KEY", .. })
        );
    }

    #[test]
    fn local_backends_need_no_piapi_key() {
        let config = load(&[
            ("FACESWAP_PROVIDER", "facefusion"),
            ("GENERATION_PROVIDER", "kling"),
            ("KLING_ACCESS_KEY", "ak"),
            ("KLING_SECRET_KEY", "sk"),
        ])
        .unwrap();

        assert_eq!(config.faceswap_backend, FaceSwapBackend::FaceFusion);
        assert_eq!(config.facefusion_url, "http://faceswap:8000");
        let kling = config.kling.unwrap();
        assert_eq!(kling.access_key, "ak");
        assert!(!format!("{kling:?}").contains("sk\""));
    }

    #[test]
    fn kling_requires_both_keys() {
        assert_matches!(
            load(&[
                ("FACESWAP_PROVIDER", "facefusion"),
                ("GENERATION_PROVIDER", "kling"),
                ("KLING_ACCESS_KEY", "ak"),
            ]),
            Err(ConfigError::Missing { name: "KLING_SECRET_KEY", .. })
        );
    }

    #[test]
    fn invalid_values_are_reported() {
        assert_matches!(
            load(&[("PIAPI_KEY", "pk"), ("FACESWAP_PROVIDER", "deepfake")]),
            Err(ConfigError::Invalid { name: "FACESWAP_PROVIDER", .. })
        );
        assert_matches!(
            load(&[("PIAPI_KEY", "pk"), ("SWAP_POLL_ATTEMPTS", "many")]),
            Err(ConfigError::Invalid { name: "SWAP_POLL_ATTEMPTS", .. })
        );
        assert_matches!(
            load(&[("PIAPI_KEY", "pk"), ("GENERATION_CONCURRENCY", "0")]),
            Err(ConfigError::Invalid { name: "GENERATION_CONCURRENCY", .. })
        );
    }

    #[test]
    fn tuning_overrides_flow_into_client_configs() {
        let config = load(&[
            ("PIAPI_KEY", "pk"),
            ("RATE_LIMIT_RETRIES", "3"),
            ("RATE_LIMIT_DELAY_MS", "250"),
            ("GENERATION_SUBMIT_DELAY_MS", "0"),
            ("GENERATION_POLL_INTERVAL_MS", "500"),
        ])
        .unwrap();

        let generation = config.generation_client();
        assert_eq!(generation.retry.max_retries, 3);
        assert_eq!(generation.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(generation.poll.rate_limit_backoff, Duration::from_millis(250));
        assert_eq!(generation.poll.interval, Duration::from_millis(500));
        assert!(generation.submit_delay.is_zero());
        assert!(config.face_swap_client().submit_delay.is_zero());
    }
}
