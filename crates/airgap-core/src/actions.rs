//! Build-time execution of `actions.onCreate` commands.

use crate::{io_at, CancelToken, CoreError};
use airgap_schema::{Action, ActionDefaults, ActionSet};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Prefix of the environment variables that expose set variables to later actions.
pub const VARIABLE_ENV_PREFIX: &str = "ZARF_VAR_";

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// An action with its set's defaults applied.
struct Effective<'a> {
    cmd: &'a str,
    mute: bool,
    max_total_seconds: u64,
    max_retries: u32,
    dir: PathBuf,
    env: Vec<(String, String)>,
}

enum Attempt {
    Succeeded(String),
    Failed(String),
    TimedOut,
}

/// Runs actions through `sh -c`, carrying variables set by earlier actions
/// into the environment of later ones.
pub struct ActionRunner {
    base_dir: PathBuf,
    variables: BTreeMap<String, String>,
    cancel: CancelToken,
}

impl ActionRunner {
    /// Relative action directories resolve against `base_dir`.
    pub fn new(base_dir: &Path, cancel: CancelToken) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            variables: BTreeMap::new(),
            cancel,
        }
    }

    /// Values captured through `setVariables` so far.
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Run `actions` in order under the defaults of `set`, stopping at the first failure.
    pub fn run_all(&mut self, set: &ActionSet, actions: &[Action]) -> Result<(), CoreError> {
        for action in actions {
            self.run(&set.defaults, action)?;
        }
        Ok(())
    }

    fn effective<'a>(&self, defaults: &ActionDefaults, action: &'a Action) -> Effective<'a> {
        let dir = action.dir.as_deref().unwrap_or(&defaults.dir);
        let mut env: Vec<(String, String)> = defaults
            .env
            .iter()
            .chain(&action.env)
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        env.extend(
            self.variables
                .iter()
                .map(|(k, v)| (format!("{VARIABLE_ENV_PREFIX}{k}"), v.clone())),
        );
        Effective {
            cmd: &action.cmd,
            mute: action.mute.unwrap_or(defaults.mute),
            max_total_seconds: action
                .max_total_seconds
                .or(defaults.max_total_seconds)
                .unwrap_or(0),
            max_retries: action.max_retries.or(defaults.max_retries).unwrap_or(0),
            dir: self.base_dir.join(dir),
            env,
        }
    }

    fn run(&mut self, defaults: &ActionDefaults, action: &Action) -> Result<(), CoreError> {
        if action.cmd.is_empty() {
            return Ok(());
        }
        let cfg = self.effective(defaults, action);
        let label = if action.description.is_empty() {
            cfg.cmd
        } else {
            action.description.as_str()
        };
        info!("running action: {label}");

        let deadline = (cfg.max_total_seconds > 0)
            .then(|| Instant::now() + Duration::from_secs(cfg.max_total_seconds));
        let mut last_failure = String::new();
        for attempt in 0..=cfg.max_retries {
            match self.attempt(&cfg, deadline)? {
                Attempt::Succeeded(out) => {
                    let value = out.trim();
                    for var in &action.set_variables {
                        debug!("action set variable {}", var.name);
                        self.variables.insert(var.name.clone(), value.to_owned());
                    }
                    return Ok(());
                }
                Attempt::TimedOut => {
                    return Err(CoreError::Action {
                        cmd: cfg.cmd.to_owned(),
                        reason: format!("timed out after {} seconds", cfg.max_total_seconds),
                    })
                }
                Attempt::Failed(reason) => {
                    debug!("attempt {} of '{}' failed: {reason}", attempt + 1, cfg.cmd);
                    last_failure = reason;
                }
            }
        }
        Err(CoreError::Action {
            cmd: cfg.cmd.to_owned(),
            reason: format!("failed after {} retries: {last_failure}", cfg.max_retries),
        })
    }

    fn attempt(&self, cfg: &Effective<'_>, deadline: Option<Instant>) -> Result<Attempt, CoreError> {
        let mut stdout = tempfile::tempfile().map_err(io_at(&cfg.dir))?;
        let mut stderr = tempfile::tempfile().map_err(io_at(&cfg.dir))?;
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(cfg.cmd)
            .current_dir(&cfg.dir)
            .envs(cfg.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone().map_err(io_at(&cfg.dir))?))
            .stderr(Stdio::from(stderr.try_clone().map_err(io_at(&cfg.dir))?))
            .spawn()
            .map_err(io_at(&cfg.dir))?;

        let status = loop {
            if let Some(status) = child.try_wait().map_err(io_at(&cfg.dir))? {
                break status;
            }
            if self.cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CoreError::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(Attempt::TimedOut);
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let out = read_back(&mut stdout, &cfg.dir)?;
        if !cfg.mute {
            let err = read_back(&mut stderr, &cfg.dir)?;
            for line in out.lines().chain(err.lines()) {
                debug!("{}: {line}", cfg.cmd);
            }
        }
        if status.success() {
            Ok(Attempt::Succeeded(out))
        } else {
            Ok(Attempt::Failed(status.to_string()))
        }
    }
}

fn read_back(file: &mut File, dir: &Path) -> Result<String, CoreError> {
    file.seek(SeekFrom::Start(0)).map_err(io_at(dir))?;
    let mut text = String::new();
    file.read_to_string(&mut text).map_err(io_at(dir))?;
    Ok(text)
}
