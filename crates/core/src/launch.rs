//! Command lines for the debuggee processes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use bugs_runtime::{Error, LaunchSpec, Result, expand_home, expand_path_list, parent_dir};

use crate::config::{CHROME_BINARY_ENV, NODE_BINARY_ENV, SessionConfig, TransportKind};

/// Builds the launch spec for the configured transport.
pub fn launch_spec(config: &SessionConfig) -> Result<LaunchSpec> {
	match config.transport_kind {
		TransportKind::Node => node_launch_spec(config, std::env::var(NODE_BINARY_ENV).ok()),
		TransportKind::Browser => chrome_launch_spec(config, std::env::var(CHROME_BINARY_ENV).ok()),
	}
}

/// `<node> <debug-flag>=<port> <script> <args..>`, run from the script's
/// directory unless `cwd` says otherwise.
pub fn node_launch_spec(config: &SessionConfig, env_binary: Option<String>) -> Result<LaunchSpec> {
	let script = config
		.script_path()
		.ok_or_else(|| Error::InvalidArgument("node sessions need a script (fileName)".to_string()))?;

	let program = resolve_binary(config.binary.as_deref(), env_binary, || {
		Some(which::which("node").unwrap_or_else(|_| PathBuf::from("node")))
	})
	.ok_or_else(|| Error::LaunchFailed("no node executable found".to_string()))?;

	let cwd = config.working_dir().unwrap_or_else(|| parent_dir(&script));

	let mut spec = LaunchSpec::new(program)
		.arg(format!("{}={}", config.debug_flag, config.port()))
		.arg(script.into_os_string())
		.args(config.args.iter().map(OsString::from))
		.cwd(cwd);
	for (key, value) in env_overrides(config) {
		spec = spec.env(key, value);
	}
	Ok(spec)
}

/// Chrome with remote debugging on the configured address and a throwaway
/// profile that lives as long as the process.
pub fn chrome_launch_spec(config: &SessionConfig, env_binary: Option<String>) -> Result<LaunchSpec> {
	let program = resolve_binary(config.binary.as_deref(), env_binary, find_chrome_executable).ok_or_else(|| {
		Error::LaunchFailed(format!(
			"no Chrome or Chromium executable found; set {CHROME_BINARY_ENV} or pass a binary"
		))
	})?;

	let profile = tempfile::Builder::new().prefix("bugs-chrome-").tempdir()?;

	let mut spec = LaunchSpec::new(program)
		.args(chrome_args(config.hostname(), config.port(), profile.path()))
		.args(config.args.iter().map(OsString::from))
		.scratch_dir(profile);
	if let Some(cwd) = config.working_dir() {
		spec = spec.cwd(cwd);
	}
	for (key, value) in env_overrides(config) {
		spec = spec.env(key, value);
	}
	Ok(spec)
}

fn chrome_args(hostname: &str, port: u16, profile: &Path) -> Vec<OsString> {
	let mut args: Vec<OsString> = [
		format!("--remote-debugging-address={hostname}"),
		format!("--remote-debugging-port={port}"),
		"--no-first-run".to_string(),
		"--disable-extensions".to_string(),
		"--disable-component-extensions-with-background-pages".to_string(),
		"--no-default-browser-check".to_string(),
		"--num-raster-threads=4".to_string(),
	]
	.into_iter()
	.map(OsString::from)
	.collect();

	let mut user_data_dir = OsString::from("--user-data-dir=");
	user_data_dir.push(profile);
	args.push(user_data_dir);
	args
}

/// Config, then environment variable, then `fallback`.
fn resolve_binary(
	configured: Option<&Path>,
	env_binary: Option<String>,
	fallback: impl FnOnce() -> Option<PathBuf>,
) -> Option<PathBuf> {
	if let Some(path) = configured {
		return Some(expand_home(&path.to_string_lossy()));
	}
	if let Some(path) = env_binary.filter(|p| !p.trim().is_empty()) {
		return Some(expand_home(path.trim()));
	}
	fallback()
}

/// Config env entries with `~` expanded in `*PATH` lists.
fn env_overrides(config: &SessionConfig) -> Vec<(String, String)> {
	config
		.env
		.iter()
		.map(|(key, value)| {
			let value = if key.ends_with("PATH") {
				expand_path_list(value)
			} else {
				value.clone()
			};
			(key.clone(), value)
		})
		.collect()
}

fn find_chrome_executable() -> Option<PathBuf> {
	let candidates: &[&str] = if cfg!(target_os = "macos") {
		&[
			"/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
			"/Applications/Chromium.app/Contents/MacOS/Chromium",
			"/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
			"/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
		]
	} else if cfg!(target_os = "windows") {
		&["chrome", "msedge", "brave"]
	} else {
		&[
			"google-chrome-stable",
			"google-chrome",
			"chromium-browser",
			"chromium",
			"brave-browser",
			"/usr/bin/google-chrome-stable",
			"/usr/bin/google-chrome",
			"/usr/bin/chromium-browser",
			"/usr/bin/chromium",
			"/snap/bin/chromium",
		]
	};

	for candidate in candidates {
		if candidate.starts_with('/') {
			let path = Path::new(candidate);
			if path.exists() {
				return Some(path.to_path_buf());
			}
		} else if let Ok(path) = which::which(candidate) {
			return Some(path);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	use super::*;

	fn args_of(spec: &LaunchSpec) -> Vec<String> {
		spec.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
	}

	#[test]
	fn node_command_line() {
		let mut config = SessionConfig::node("/srv/app/main.js");
		config.binary = Some(PathBuf::from("/opt/node/bin/node"));
		config.args = vec!["--verbose".to_string()];
		config.port = Some(6000);

		let spec = node_launch_spec(&config, None).unwrap();
		assert_eq!(spec.program, PathBuf::from("/opt/node/bin/node"));
		assert_eq!(args_of(&spec), vec!["--debug-brk=6000", "/srv/app/main.js", "--verbose"]);
		assert_eq!(spec.cwd, Some(PathBuf::from("/srv/app")));
	}

	#[test]
	fn node_binary_from_environment() {
		let config = SessionConfig::node("/srv/app/main.js");
		let spec = node_launch_spec(&config, Some("/usr/local/bin/node".to_string())).unwrap();
		assert_eq!(spec.program, PathBuf::from("/usr/local/bin/node"));
	}

	#[test]
	fn node_explicit_cwd_and_path_env() {
		let mut config = SessionConfig::node("main.js");
		config.binary = Some(PathBuf::from("node"));
		config.cwd = Some(PathBuf::from("/work"));
		config.env.insert("NODE_PATH".to_string(), "~/lib".to_string());
		config.env.insert("DEBUG".to_string(), "~".to_string());

		let spec = node_launch_spec(&config, None).unwrap();
		assert_eq!(spec.cwd, Some(PathBuf::from("/work")));
		let node_path = spec.env.iter().find(|(k, _)| k == "NODE_PATH").unwrap();
		assert!(!node_path.1.starts_with('~'));
		assert!(spec.env.contains(&("DEBUG".to_string(), "~".to_string())));
	}

	#[test]
	fn node_requires_script() {
		let config = SessionConfig {
			binary: Some(PathBuf::from("node")),
			..Default::default()
		};
		assert!(matches!(node_launch_spec(&config, None), Err(Error::InvalidArgument(_))));
	}

	#[test]
	fn chrome_command_line() {
		let mut config = SessionConfig::browser(Some("http://localhost:8080/".to_string()));
		config.binary = Some(PathBuf::from("/usr/bin/chromium"));

		let spec = chrome_launch_spec(&config, None).unwrap();
		let args = args_of(&spec);
		assert_eq!(args[0], "--remote-debugging-address=127.0.0.1");
		assert_eq!(args[1], "--remote-debugging-port=9222");
		assert!(args.contains(&"--no-first-run".to_string()));
		assert!(args.contains(&"--num-raster-threads=4".to_string()));

		let profile = spec.scratch_dir.as_ref().unwrap().path().to_path_buf();
		assert!(profile.exists());
		assert_eq!(args.last().unwrap(), &format!("--user-data-dir={}", profile.display()));

		drop(spec);
		assert!(!profile.exists());
	}
}
