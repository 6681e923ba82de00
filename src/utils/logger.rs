/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fs;
use std::path::Path;

use flexi_logger::{
    colored_opt_format, Age, Cleanup, Criterion, Duplicate, FileSpec, FlexiLoggerError, Logger,
    LoggerHandle, Naming,
};

const DEFAULT_LOG_RETENTION: usize = 7;

fn writable_dir(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return true;
    }
    if path.exists() {
        path.metadata()
            .ok()
            .map(|meta| !meta.permissions().readonly())
            .unwrap_or(false)
    } else {
        fs::create_dir_all(path).is_ok()
    }
}

/// Starts the global logger. `RUST_LOG` takes precedence over `log_level`.
///
/// With an empty `log_file` everything goes to stderr. Otherwise records are
/// written to the file, rotated daily, and warnings are duplicated to stderr.
pub fn init(log_level: &str, log_file: &str) -> Result<LoggerHandle, FlexiLoggerError> {
    let logger = Logger::try_with_env_or_str(log_level)?.format(colored_opt_format);
    if log_file.is_empty() {
        return logger.log_to_stderr().start();
    }

    let base_path = Path::new(log_file).parent().unwrap_or(Path::new(""));
    let logger = if writable_dir(base_path) {
        logger
            .log_to_file(FileSpec::try_from(log_file)?)
            .rotate(
                Criterion::Age(Age::Day),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(DEFAULT_LOG_RETENTION),
            )
            .append()
            .duplicate_to_stderr(Duplicate::Warn)
    } else {
        eprintln!(
            "Log file path '{}' access denied, logs will not be written to file",
            log_file
        );
        logger.log_to_stderr()
    };
    logger.start()
}
