use super::parsing::{
    env_optional, env_or_default, parse_backoff, parse_bool, parse_cors_origins,
    parse_environment, parse_f64, parse_u16, parse_u32, parse_u64, parse_usize,
};
use super::types::{
    ApiSettings, BackoffSettings, ConfigError, CorsSettings, DatabaseSettings,
    DownstreamSettings, EvaluationSettings, NotificationSettings, ReconciliationSettings,
    RedisSettings, RetrySettings, RuntimeSettings, ServerHost, ServerPort, ServerSettings,
    Settings, TelemetrySettings, TranscriptionSettings, WorkerSettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("BANDSCORE_HOST", "0.0.0.0");
        let port = env_or_default("BANDSCORE_PORT", "8000");

        let environment = parse_environment(
            env_optional("BANDSCORE_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("BANDSCORE_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Bandscore Pipeline");
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");
        let submit_rate_limit_window_seconds = parse_u64(
            "SUBMIT_RATE_LIMIT_WINDOW_SECONDS",
            env_or_default("SUBMIT_RATE_LIMIT_WINDOW_SECONDS", "5"),
        )?;

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "bandscore");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "bandscore");
        let database_url = env_optional("DATABASE_URL");
        let max_connections =
            parse_u32("DATABASE_MAX_CONNECTIONS", env_or_default("DATABASE_MAX_CONNECTIONS", "30"))?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let evaluation_api_key = env_or_default("EVALUATION_API_KEY", "");
        let evaluation_base_url = env_or_default("EVALUATION_BASE_URL", "");
        let evaluation_model = env_or_default("EVALUATION_MODEL", "gpt-4.1");
        let evaluation_max_tokens =
            parse_u32("EVALUATION_MAX_TOKENS", env_or_default("EVALUATION_MAX_TOKENS", "4000"))?;
        let evaluation_temperature =
            parse_f64("EVALUATION_TEMPERATURE", env_or_default("EVALUATION_TEMPERATURE", "0.2"))?;
        let evaluation_timeout = parse_u64(
            "EVALUATION_TIMEOUT_SECONDS",
            env_or_default("EVALUATION_TIMEOUT_SECONDS", "120"),
        )?;

        let transcription_api_key = env_or_default("TRANSCRIPTION_API_KEY", "");
        let transcription_base_url = env_or_default("TRANSCRIPTION_BASE_URL", "");
        let transcription_model = env_or_default("TRANSCRIPTION_MODEL", "whisper-1");
        let transcription_timeout = parse_u64(
            "TRANSCRIPTION_TIMEOUT_SECONDS",
            env_or_default("TRANSCRIPTION_TIMEOUT_SECONDS", "90"),
        )?;
        let min_transcript_words =
            parse_usize("MIN_TRANSCRIPT_WORDS", env_or_default("MIN_TRANSCRIPT_WORDS", "3"))?;

        let downstream_base_url = env_or_default("DOWNSTREAM_BASE_URL", "");
        let downstream_token = env_or_default("DOWNSTREAM_SERVICE_TOKEN", "");
        let downstream_timeout = parse_u64(
            "DOWNSTREAM_TIMEOUT_SECONDS",
            env_or_default("DOWNSTREAM_TIMEOUT_SECONDS", "30"),
        )?;

        let notification_base_url = env_or_default("NOTIFICATION_BASE_URL", "");
        let notification_token = env_or_default("NOTIFICATION_SERVICE_TOKEN", "");
        let notification_timeout = parse_u64(
            "NOTIFICATION_TIMEOUT_SECONDS",
            env_or_default("NOTIFICATION_TIMEOUT_SECONDS", "10"),
        )?;

        let evaluation_retry = parse_backoff(
            [
                "EVALUATION_RETRY_ATTEMPTS",
                "EVALUATION_RETRY_DELAY_MS",
                "EVALUATION_RETRY_MULTIPLIER",
            ],
            BackoffSettings { max_attempts: 3, initial_delay_ms: 2_000, multiplier: 2.0 },
        )?;
        let transcription_retry = parse_backoff(
            [
                "TRANSCRIPTION_RETRY_ATTEMPTS",
                "TRANSCRIPTION_RETRY_DELAY_MS",
                "TRANSCRIPTION_RETRY_MULTIPLIER",
            ],
            BackoffSettings { max_attempts: 3, initial_delay_ms: 2_000, multiplier: 2.0 },
        )?;
        let sync_retry = parse_backoff(
            ["SYNC_RETRY_ATTEMPTS", "SYNC_RETRY_DELAY_MS", "SYNC_RETRY_MULTIPLIER"],
            BackoffSettings { max_attempts: 5, initial_delay_ms: 1_000, multiplier: 2.0 },
        )?;
        let notification_retry = parse_backoff(
            [
                "NOTIFICATION_RETRY_ATTEMPTS",
                "NOTIFICATION_RETRY_DELAY_MS",
                "NOTIFICATION_RETRY_MULTIPLIER",
            ],
            BackoffSettings { max_attempts: 2, initial_delay_ms: 500, multiplier: 2.0 },
        )?;

        let reconciliation_interval = parse_u64(
            "RECONCILIATION_INTERVAL_SECONDS",
            env_or_default("RECONCILIATION_INTERVAL_SECONDS", "300"),
        )?;
        let reconciliation_batch = parse_u64(
            "RECONCILIATION_BATCH_SIZE",
            env_or_default("RECONCILIATION_BATCH_SIZE", "50"),
        )?;
        let max_sync_attempts =
            parse_u32("MAX_SYNC_ATTEMPTS", env_or_default("MAX_SYNC_ATTEMPTS", "5"))?;

        let pool_size =
            parse_usize("TASK_POOL_SIZE", env_or_default("TASK_POOL_SIZE", "4"))?;
        let queue_capacity =
            parse_usize("TASK_QUEUE_CAPACITY", env_or_default("TASK_QUEUE_CAPACITY", "256"))?;
        let stale_evaluation_seconds = parse_u64(
            "STALE_EVALUATION_SECONDS",
            env_or_default("STALE_EVALUATION_SECONDS", "900"),
        )?;
        let pending_requeue_seconds = parse_u64(
            "PENDING_REQUEUE_SECONDS",
            env_or_default("PENDING_REQUEUE_SECONDS", "120"),
        )?;

        let log_level = env_or_default("BANDSCORE_LOG_LEVEL", "info");
        let json = env_optional("BANDSCORE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, api_v1_str, submit_rate_limit_window_seconds },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            evaluation: EvaluationSettings {
                api_key: evaluation_api_key,
                base_url: evaluation_base_url,
                model: evaluation_model,
                max_tokens: evaluation_max_tokens,
                temperature: evaluation_temperature,
                request_timeout_seconds: evaluation_timeout,
            },
            transcription: TranscriptionSettings {
                api_key: transcription_api_key,
                base_url: transcription_base_url,
                model: transcription_model,
                request_timeout_seconds: transcription_timeout,
                min_transcript_words,
            },
            downstream: DownstreamSettings {
                base_url: downstream_base_url,
                service_token: downstream_token,
                request_timeout_seconds: downstream_timeout,
            },
            notifications: NotificationSettings {
                base_url: notification_base_url,
                service_token: notification_token,
                request_timeout_seconds: notification_timeout,
            },
            retry: RetrySettings {
                evaluation: evaluation_retry,
                transcription: transcription_retry,
                sync: sync_retry,
                notification: notification_retry,
            },
            reconciliation: ReconciliationSettings {
                interval_seconds: reconciliation_interval,
                batch_size: reconciliation_batch.min(i64::MAX as u64) as i64,
                max_sync_attempts: max_sync_attempts.min(i32::MAX as u32) as i32,
            },
            workers: WorkerSettings {
                pool_size,
                queue_capacity,
                stale_evaluation_seconds,
                pending_requeue_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn evaluation(&self) -> &EvaluationSettings {
        &self.evaluation
    }

    pub(crate) fn transcription(&self) -> &TranscriptionSettings {
        &self.transcription
    }

    pub(crate) fn downstream(&self) -> &DownstreamSettings {
        &self.downstream
    }

    pub(crate) fn notifications(&self) -> &NotificationSettings {
        &self.notifications
    }

    pub(crate) fn retry(&self) -> &RetrySettings {
        &self.retry
    }

    pub(crate) fn reconciliation(&self) -> &ReconciliationSettings {
        &self.reconciliation
    }

    pub(crate) fn workers(&self) -> &WorkerSettings {
        &self.workers
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "TASK_POOL_SIZE",
                value: "0".to_string(),
            });
        }

        if self.workers.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "TASK_QUEUE_CAPACITY",
                value: "0".to_string(),
            });
        }

        if self.reconciliation.interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "RECONCILIATION_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.reconciliation.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "RECONCILIATION_BATCH_SIZE",
                value: "0".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&self.evaluation.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "EVALUATION_TEMPERATURE",
                value: self.evaluation.temperature.to_string(),
            });
        }

        if !self.runtime.strict_config {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        if self.evaluation.api_key.is_empty() || self.evaluation.base_url.is_empty() {
            return Err(ConfigError::MissingSecret("EVALUATION_API_KEY/EVALUATION_BASE_URL"));
        }

        if self.transcription.api_key.is_empty() || self.transcription.base_url.is_empty() {
            return Err(ConfigError::MissingSecret("TRANSCRIPTION_API_KEY/TRANSCRIPTION_BASE_URL"));
        }

        if self.downstream.base_url.is_empty() || self.downstream.service_token.is_empty() {
            return Err(ConfigError::MissingSecret("DOWNSTREAM_BASE_URL/DOWNSTREAM_SERVICE_TOKEN"));
        }

        Ok(())
    }
}
