use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use thiserror::Error;

use crate::config::{absolute_from, make_absolute, ConfigError, HarnessConfig};
use crate::paths::Layout;

/// Process names removed by `--force`.
const KILL_TARGETS: [&str; 2] = ["arangodb", "arangod"];

const SINGLE_SERVER_DATA_DIR: &str = "singleServer";
const SINGLE_SERVER_MODE: &str = "single";
const IDLE_FOR: Duration = Duration::from_secs(1_000_000);
const RELAY_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no starter binary to launch")]
    NoStarter,
    #[error("could not clean data directory {path}: {source}")]
    CleanDataDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Arguments for the `arangodb` starter. Every segment is optional and only
/// rendered when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StarterCommand {
    pub starter: Option<PathBuf>,
    pub arangod: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub js_dir: Option<PathBuf>,
    pub mode: Option<String>,
    pub clean_data_dir: bool, // remove data_dir before launching
    pub upgrade: bool,
}

impl StarterCommand {
    pub fn program(&self, base: &Path) -> Option<PathBuf> {
        self.starter.as_deref().map(|p| absolute_from(base, p))
    }

    pub fn args(&self, base: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(arangod) = &self.arangod {
            args.push(format!(
                "--server.arangod={}",
                absolute_from(base, arangod).display()
            ));
        }
        if let Some(data_dir) = &self.data_dir {
            args.push(format!(
                "--starter.data-dir={}",
                absolute_from(base, data_dir).display()
            ));
        }
        if let Some(js_dir) = &self.js_dir {
            args.push("--server.js-dir".to_string());
            args.push(absolute_from(base, js_dir).display().to_string());
        }
        if let Some(mode) = &self.mode {
            args.push("--starter.mode".to_string());
            args.push(mode.clone());
        }
        if self.upgrade {
            args.push("--all.database.auto-upgrade".to_string());
            args.push("true".to_string());
        }
        args
    }
}

/// Starter invocation for the `singleServer` command.
///
/// Always runs the new version on a freshly cleaned data directory, with or
/// without an older package next to it.
pub fn single_server_command(config: &HarnessConfig, layout: &Layout) -> StarterCommand {
    StarterCommand {
        starter: Some(layout.new.starter.clone()),
        arangod: Some(layout.new.arangod.clone()),
        data_dir: Some(config.database_dir.join(SINGLE_SERVER_DATA_DIR)),
        js_dir: Some(layout.new.js_dir.clone()),
        mode: Some(SINGLE_SERVER_MODE.to_string()),
        clean_data_dir: true,
        upgrade: false,
    }
}

pub fn run_single_server(config: &HarnessConfig, layout: &Layout, debug: bool) -> Result<(), LaunchError> {
    let cmd = single_server_command(config, layout);
    launch(config, "testSingleServer", &cmd, debug)?;
    println!("Started ArangoDB Single Server, go to http://localhost:8529/ and start testing!");
    Ok(())
}

/// Best-effort `killall -9` of running starters and servers. Never fails.
pub fn kill_all() {
    for name in KILL_TARGETS {
        match Command::new("killall")
            .args(["-9", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => log::debug!("killed running {name} instances"),
            Ok(status) => log::debug!("killall {name} exited with {status}"),
            Err(e) => log::debug!("killall {name} failed: {e}"),
        }
    }
}

/// Start `cmd` detached from the harness.
///
/// A re-runnable copy of the invocation is written to `<tmp>/<name>.sh`; the
/// starter itself is spawned directly, never through a shell.
pub fn launch(
    config: &HarnessConfig,
    name: &str,
    cmd: &StarterCommand,
    debug: bool,
) -> Result<(), LaunchError> {
    let base = std::env::current_dir().map_err(ConfigError::from)?;
    let program = cmd.program(&base).ok_or(LaunchError::NoStarter)?;
    let args = cmd.args(&base);

    if cmd.clean_data_dir {
        if let Some(data_dir) = &cmd.data_dir {
            clean_data_dir(&absolute_from(&base, data_dir))?;
        }
    }

    let tmp_dir = make_absolute(&config.tmp_dir)?;
    let script = tmp_dir.join(format!("{name}.sh"));
    match write_launch_script(&script, &program, &args) {
        Ok(()) => log::debug!("the file {} was saved", script.display()),
        Err(e) => log::debug!("could not write {}: {e}", script.display()),
    }

    log::info!("launching {}", render(&program, &args));
    let output_dir = debug.then_some(tmp_dir.as_path());
    spawn_detached(&program, &args, output_dir, name)?;
    Ok(())
}

/// Keep the harness alive while the user tests against the detached server.
pub fn idle() {
    log::info!("sleeping for {} sec", IDLE_FOR.as_secs());
    std::thread::sleep(IDLE_FOR);
}

fn clean_data_dir(path: &Path) -> Result<(), LaunchError> {
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|source| LaunchError::CleanDataDir {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn render(program: &Path, args: &[String]) -> String {
    let program = program.to_string_lossy();
    shell_words::join(std::iter::once(&*program).chain(args.iter().map(String::as_str)))
}

fn write_launch_script(path: &Path, program: &Path, args: &[String]) -> std::io::Result<()> {
    std::fs::write(path, format!("#!/bin/sh\n{}\n", render(program, args)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

/// Spawn in a new process group so the child survives the harness.
///
/// With `output_dir` set (debug mode) stdout and stderr go to
/// `<output_dir>/<name>.stdout.log` and `.stderr.log`, which are tailed into
/// the log. Files rather than pipes, so the starter never writes into a
/// closed pipe once the harness is gone. Without it output is discarded.
fn spawn_detached(
    program: &Path,
    args: &[String],
    output_dir: Option<&Path>,
    name: &str,
) -> Result<(), LaunchError> {
    let stdout_log = output_dir.map(|dir| dir.join(format!("{name}.stdout.log")));
    let stderr_log = output_dir.map(|dir| dir.join(format!("{name}.stderr.log")));

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(output_to(stdout_log.as_deref()))
        .stderr(output_to(stderr_log.as_deref()));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn().map_err(|source| LaunchError::Spawn {
        program: program.to_path_buf(),
        source,
    })?;
    log::debug!("spawned {} (pid {})", program.display(), child.id());

    if let Some(path) = stdout_log {
        relay(path, "STDOUT");
    }
    if let Some(path) = stderr_log {
        relay(path, "STDERR");
    }
    reap(child);
    Ok(())
}

fn output_to(path: Option<&Path>) -> Stdio {
    let Some(path) = path else {
        return Stdio::null();
    };
    match File::create(path) {
        Ok(file) => Stdio::from(file),
        Err(e) => {
            log::debug!("could not create {}: {e}", path.display());
            Stdio::null()
        }
    }
}

/// Follow a growing output file, logging each complete line.
fn relay(path: PathBuf, label: &'static str) {
    std::thread::spawn(move || {
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                log::debug!("{label} not available: {e}");
                return;
            }
        };
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        loop {
            match reader.read_line(&mut line) {
                Ok(0) => std::thread::sleep(RELAY_POLL),
                Ok(_) if line.ends_with('\n') => {
                    log::debug!("{label}: {}", line.trim_end());
                    line.clear();
                }
                Ok(_) => {}
                Err(e) => {
                    log::debug!("{label} closed: {e}");
                    break;
                }
            }
        }
    });
}

fn reap(mut child: Child) {
    std::thread::spawn(move || match child.wait() {
        Ok(status) => log::debug!("child exited with code {:?}", status.code()),
        Err(e) => log::debug!("could not wait for child: {e}"),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::PackageSet;
    use crate::paths::VersionPaths;
    use tempfile::tempdir;

    fn version(root: &str) -> VersionPaths {
        let root = PathBuf::from(root);
        VersionPaths {
            sub_dir: root.file_name().unwrap().to_string_lossy().into_owned(),
            starter: root.join("usr/bin/arangodb"),
            arangod: root.join("usr/sbin/arangod"),
            js_dir: root.join("usr/share/arangodb3/js"),
        }
    }

    fn layout(upgrade: bool) -> Layout {
        Layout {
            packages: PackageSet {
                new: "new.tar.gz".to_string(),
                old: upgrade.then(|| "old.tar.gz".to_string()),
            },
            new: version("./tmp/new/arangodb3-3.6.0"),
            old: upgrade.then(|| version("./tmp/old/arangodb3-3.5.3")),
        }
    }

    fn config() -> HarnessConfig {
        HarnessConfig::new(PathBuf::from("./arangodb"), PathBuf::from("./tmp"))
    }

    #[test]
    fn full_command_renders_every_segment() {
        let base = Path::new("/work");
        let cmd = single_server_command(&config(), &layout(false));

        assert_eq!(
            cmd.program(base),
            Some(PathBuf::from("/work/tmp/new/arangodb3-3.6.0/usr/bin/arangodb"))
        );
        assert_eq!(
            cmd.args(base),
            vec![
                "--server.arangod=/work/tmp/new/arangodb3-3.6.0/usr/sbin/arangod",
                "--starter.data-dir=/work/tmp/databaseDirectory/singleServer",
                "--server.js-dir",
                "/work/tmp/new/arangodb3-3.6.0/usr/share/arangodb3/js",
                "--starter.mode",
                "single",
            ]
        );
        assert!(cmd.clean_data_dir);
    }

    #[test]
    fn absent_inputs_omit_their_segments() {
        let base = Path::new("/work");
        let cmd = StarterCommand {
            data_dir: Some(PathBuf::from("db")),
            ..Default::default()
        };
        assert_eq!(cmd.program(base), None);
        let args = cmd.args(base);
        assert_eq!(args, vec!["--starter.data-dir=/work/db"]);
        assert!(!args.iter().any(|a| a.starts_with("--server.arangod=")));

        assert!(StarterCommand::default().args(base).is_empty());
    }

    #[test]
    fn upgrade_mode_launches_new_version_on_fresh_data() {
        let base = Path::new("/work");
        let cmd = single_server_command(&config(), &layout(true));
        assert_eq!(cmd, single_server_command(&config(), &layout(false)));
        assert!(cmd.clean_data_dir);
        assert!(!cmd.upgrade);
        let args = cmd.args(base);
        assert!(!args.iter().any(|a| a.contains("auto-upgrade")));
        assert!(!args.iter().any(|a| a.contains("/tmp/old/")));
    }

    #[test]
    fn upgrade_flag_renders_last() {
        let base = Path::new("/work");
        let cmd = StarterCommand {
            mode: Some("single".to_string()),
            upgrade: true,
            ..Default::default()
        };
        assert_eq!(
            cmd.args(base),
            vec!["--starter.mode", "single", "--all.database.auto-upgrade", "true"]
        );
    }

    #[test]
    fn launch_without_starter_fails() {
        let dir = tempdir().unwrap();
        let config = HarnessConfig::new(dir.path().join("arangodb"), dir.path().join("tmp"));
        let result = launch(&config, "empty", &StarterCommand::default(), false);
        assert!(matches!(result, Err(LaunchError::NoStarter)));
    }

    #[test]
    fn launch_script_is_quoted_and_executable() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("testSingleServer.sh");
        let args = vec!["--server.js-dir".to_string(), "/with space/js".to_string()];
        write_launch_script(&script, Path::new("/opt/arangodb"), &args).unwrap();

        let content = std::fs::read_to_string(&script).unwrap();
        assert_eq!(
            content,
            "#!/bin/sh\n/opt/arangodb --server.js-dir '/with space/js'\n"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&script).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[cfg(unix)]
    #[test]
    fn launch_spawns_starter_with_args() {
        let dir = tempdir().unwrap();
        let config = HarnessConfig::new(dir.path().join("arangodb"), dir.path().join("tmp"));
        std::fs::create_dir_all(&config.database_dir).unwrap();

        // Fake starter that records its arguments.
        let record = dir.path().join("args.txt");
        let starter = dir.path().join("fake-arangodb");
        std::fs::write(
            &starter,
            format!("#!/bin/sh\necho \"$@\" > '{}'\n", record.display()),
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&starter, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let data_dir = config.database_dir.join("singleServer");
        std::fs::create_dir_all(data_dir.join("leftover")).unwrap();
        let cmd = StarterCommand {
            starter: Some(starter),
            data_dir: Some(data_dir.clone()),
            mode: Some("single".to_string()),
            clean_data_dir: true,
            ..Default::default()
        };
        launch(&config, "fake", &cmd, true).unwrap();

        assert!(!data_dir.join("leftover").exists());
        assert!(config.tmp_dir.join("fake.sh").exists());

        let mut recorded = String::new();
        for _ in 0..100 {
            recorded = std::fs::read_to_string(&record).unwrap_or_default();
            if !recorded.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(
            recorded.trim(),
            format!("--starter.data-dir={} --starter.mode single", data_dir.display())
        );
    }

    #[cfg(unix)]
    #[test]
    fn debug_output_goes_to_files_not_pipes() {
        let dir = tempdir().unwrap();
        let starter = dir.path().join("chatty-arangodb");
        std::fs::write(&starter, "#!/bin/sh\necho up\necho oops >&2\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&starter, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        spawn_detached(&starter, &[], Some(dir.path()), "chatty").unwrap();

        let stdout_log = dir.path().join("chatty.stdout.log");
        let stderr_log = dir.path().join("chatty.stderr.log");
        let mut out = (String::new(), String::new());
        for _ in 0..100 {
            out = (
                std::fs::read_to_string(&stdout_log).unwrap_or_default(),
                std::fs::read_to_string(&stderr_log).unwrap_or_default(),
            );
            if !out.0.is_empty() && !out.1.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(out.0, "up\n");
        assert_eq!(out.1, "oops\n");
    }

    #[test]
    fn spawn_missing_binary_is_an_error() {
        let result = spawn_detached(
            Path::new("/nonexistent/arangodb-does-not-exist"),
            &[],
            None,
            "missing",
        );
        assert!(matches!(result, Err(LaunchError::Spawn { .. })));
    }
}
