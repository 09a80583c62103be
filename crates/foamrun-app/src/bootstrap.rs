use foamrun_api::ApiServer;
use foamrun_config::{AppConfig, LogFormatChoice, LoggingSettings, RunnerLimits};
use foamrun_runner::{CaseRunner, RunnerSettings, ToolCatalog, ToolRole};
use foamrun_telemetry::{LogFormat, LoggingConfig, Metrics, init_logging};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};

const BUILD_SHA: &str = match option_env!("FOAMRUN_BUILD_SHA") {
    Some(sha) => sha,
    None => "dev",
};

const FIXED_TOOLS: [ToolRole; 3] = [
    ToolRole::BlockMesh,
    ToolRole::SnappyHexMesh,
    ToolRole::PotentialFoam,
];

/// Entry point for the service boot sequence.
///
/// # Errors
///
/// Returns an error if configuration is invalid, logging cannot be installed,
/// or the API server fails to bind or serve.
pub async fn run_app() -> AppResult<()> {
    let config = AppConfig::from_env().map_err(|err| AppError::config("config.from_env", err))?;
    run_app_with(config).await
}

/// Boot sequence driven entirely by an already-loaded configuration.
pub(crate) async fn run_app_with(config: AppConfig) -> AppResult<()> {
    init_logging(&logging_config(&config.logging))
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    announce_config(&config);
    let telemetry =
        Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;

    let server = build_server(&config, telemetry);
    server
        .serve(config.server.socket_addr())
        .await
        .map_err(|err| {
            if err.is_address_in_use() {
                error!(
                    port = config.server.http_port,
                    "listen address in use; set FOAMRUN_HTTP_PORT to another port"
                );
            }
            AppError::api_server("api.serve", err)
        })?;

    info!("foamrun shut down");
    Ok(())
}

/// Log the loaded configuration; only meaningful once logging is installed.
pub(crate) fn announce_config(config: &AppConfig) {
    debug!(?config, "configuration loaded");
    info!(
        addr = %config.server.socket_addr(),
        max_concurrent_runs = config.runner.max_concurrent_runs,
        tool_timeout_secs = config.runner.tool_timeout.as_secs(),
        work_root = %config.runner.work_root.display(),
        "foamrun bootstrap starting"
    );
}

pub(crate) fn build_server(config: &AppConfig, telemetry: Metrics) -> ApiServer {
    let catalog = ToolCatalog::from_search_path(config.runner.tool_path.clone());
    for role in FIXED_TOOLS {
        if let Some(program) = role.program()
            && catalog.resolve(program).is_none()
        {
            warn!(tool = program, "tool not found on search path; cases needing it will fail");
        }
    }
    let runner = CaseRunner::new(runner_settings(&config.runner), catalog, telemetry.clone());
    ApiServer::new(runner, telemetry, config.server.max_upload_bytes)
}

pub(crate) fn runner_settings(limits: &RunnerLimits) -> RunnerSettings {
    RunnerSettings {
        work_root: limits.work_root.clone(),
        tool_timeout: limits.tool_timeout,
        max_concurrent_runs: limits.max_concurrent_runs,
    }
}

pub(crate) fn logging_config(settings: &LoggingSettings) -> LoggingConfig<'_> {
    LoggingConfig {
        level: &settings.level,
        format: settings.format.map_or_else(LogFormat::infer, log_format),
        build_sha: BUILD_SHA,
    }
}

const fn log_format(choice: LogFormatChoice) -> LogFormat {
    match choice {
        LogFormatChoice::Json => LogFormat::Json,
        LogFormatChoice::Pretty => LogFormat::Pretty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashMap;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tracing_subscriber::fmt::MakeWriter;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        Ok(AppConfig::from_lookup(|name| vars.get(name).cloned())?)
    }

    #[test]
    fn logging_config_honours_explicit_format() -> Result<()> {
        let json = config(&[("FOAMRUN_LOG_FORMAT", "json"), ("FOAMRUN_LOG_LEVEL", "debug")])?;
        let logging = logging_config(&json.logging);
        assert_eq!(logging.format, LogFormat::Json);
        assert_eq!(logging.level, "debug");

        let pretty = config(&[("FOAMRUN_LOG_FORMAT", "pretty")])?;
        assert_eq!(logging_config(&pretty.logging).format, LogFormat::Pretty);

        let inferred = config(&[])?;
        assert_eq!(logging_config(&inferred.logging).format, LogFormat::infer());
        Ok(())
    }

    #[test]
    fn runner_settings_follow_configured_limits() -> Result<()> {
        let loaded = config(&[
            ("FOAMRUN_MAX_CONCURRENT_RUNS", "4"),
            ("FOAMRUN_TOOL_TIMEOUT_SECS", "90"),
            ("FOAMRUN_WORK_ROOT", "/srv/foamrun"),
        ])?;
        let settings = runner_settings(&loaded.runner);
        assert_eq!(settings.max_concurrent_runs, 4);
        assert_eq!(settings.tool_timeout, Duration::from_secs(90));
        assert_eq!(settings.work_root, std::path::PathBuf::from("/srv/foamrun"));
        Ok(())
    }

    #[test]
    fn missing_tools_do_not_block_startup() -> Result<()> {
        let loaded = config(&[("FOAMRUN_TOOL_PATH", "/nonexistent/foamrun-bin")])?;
        let _server = build_server(&loaded, Metrics::new()?);
        Ok(())
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .map_err(|_| io::Error::other("log buffer poisoned"))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn loaded_configuration_reaches_the_installed_subscriber() -> Result<()> {
        let loaded = config(&[("FOAMRUN_HTTP_PORT", "5123")])?;
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || announce_config(&loaded));

        let captured = logs
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("log buffer poisoned"))?
            .clone();
        let output = String::from_utf8(captured)?;
        assert!(output.contains("configuration loaded"));
        assert!(output.contains("http_port: 5123"));
        assert!(output.contains("0.0.0.0:5123"));
        Ok(())
    }
}
