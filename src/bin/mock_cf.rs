//! Mock control-plane binary for integration testing
//!
//! Implements the slice of the `cf` CLI the acceptance scenarios use, backed
//! by a JSON state file in `$CF_HOME` so that separate invocations see each
//! other's effects. Deleted instances report `STOPPING` for
//! `MOCK_CF_DOWN_MS` milliseconds (default 1500) before running again.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use cats::platform::api::{InstanceState, InstanceStats, Process, ResourceList};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

const STATE_FILE: &str = "mock-cf.json";
const LOCK_FILE: &str = "mock-cf.lock";

/// Flags that take a value; everything else starting with `-` is a switch
const VALUE_FLAGS: &[&str] = &[
    "-b", "-c", "-d", "-i", "-k", "-m", "-p", "-s", "-t", "-u",
    "--health-check-type", "--hostname", "-X", "-H",
];

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    apps: BTreeMap<String, MockApp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MockApp {
    guid: String,
    process_guid: String,
    started: bool,
    health_check: String,
    instances: Vec<MockInstance>,
    logs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MockInstance {
    /// Unix millis until which the instance reports STOPPING
    down_until: Option<i64>,
}

impl MockInstance {
    fn state(&self, started: bool) -> InstanceState {
        if !started {
            return InstanceState::Down;
        }
        match self.down_until {
            Some(until) if Utc::now().timestamp_millis() < until => InstanceState::Stopping,
            _ => InstanceState::Running,
        }
    }
}

impl MockApp {
    fn stats(&self) -> ResourceList<InstanceStats> {
        ResourceList {
            resources: self
                .instances
                .iter()
                .enumerate()
                .map(|(i, instance)| InstanceStats {
                    state: instance.state(self.started),
                    index: Some(i as u32),
                })
                .collect(),
        }
    }

    fn log(&mut self, source: &str, line: impl AsRef<str>) {
        self.logs.push(format!(
            "{} [{}] OUT {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            source,
            line.as_ref()
        ));
    }

    fn heartbeat(&mut self) {
        let line = format!("I am working at {}", Utc::now().format("%H:%M:%S%.3f"));
        self.log("APP/PROC/WEB/0", line);
    }

    fn start(&mut self) {
        self.log("STG/0", "Staging complete");
        self.log("CELL/0", "Creating container");
        self.started = true;
        for instance in &mut self.instances {
            instance.down_until = None;
        }
        self.heartbeat();
    }
}

/// What a command printed and how it exited
struct Outcome {
    stdout: String,
    stderr: String,
    code: i32,
}

impl Outcome {
    fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: 0,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            stdout: "FAILED\n".to_string(),
            stderr: format!("{}\n", message.into()),
            code: 1,
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let home = std::env::var_os("CF_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);

    if args.first().map(String::as_str) == Some("logs") && !args.iter().any(|a| a == "--recent")
    {
        stream_logs(&home, &args[1..]);
        return;
    }

    let outcome = match with_state(&home, |state| handle(state, &args)) {
        Ok(outcome) => outcome,
        Err(e) => Outcome::failed(format!("mock-cf state error: {}", e)),
    };

    print!("{}", outcome.stdout);
    eprint!("{}", outcome.stderr);
    std::process::exit(outcome.code);
}

/// Run `f` with exclusive access to the state file
fn with_state<F>(home: &Path, f: F) -> std::io::Result<Outcome>
where
    F: FnOnce(&mut State) -> Outcome,
{
    std::fs::create_dir_all(home)?;
    let lock = home.join(LOCK_FILE);
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&lock) {
            Ok(_) => break,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // A holder killed mid-update never removes its lock
                let stale = std::fs::metadata(&lock)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.elapsed().ok())
                    .is_some_and(|age| age > Duration::from_secs(5));
                if stale {
                    std::fs::remove_file(&lock).ok();
                    continue;
                }
                if Instant::now() > deadline {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "state lock held for too long",
                    ));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => return Err(e),
        }
    }

    let result = apply(&home.join(STATE_FILE), f);
    std::fs::remove_file(&lock).ok();
    result
}

fn apply<F>(path: &Path, f: F) -> std::io::Result<Outcome>
where
    F: FnOnce(&mut State) -> Outcome,
{
    let mut state: State = match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
        Err(e) => return Err(e),
    };
    let outcome = f(&mut state);
    std::fs::write(path, serde_json::to_vec_pretty(&state)?)?;
    Ok(outcome)
}

/// Split arguments into positionals and `flag -> value` pairs
fn parse(args: &[String]) -> (Vec<String>, BTreeMap<String, String>) {
    let mut positional = Vec::new();
    let mut flags = BTreeMap::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            flags.insert(arg.clone(), iter.next().cloned().unwrap_or_default());
        } else if arg.starts_with('-') {
            flags.insert(arg.clone(), String::new());
        } else {
            positional.push(arg.clone());
        }
    }
    (positional, flags)
}

fn new_guid() -> String {
    let bits: u128 = rand::random();
    let hex = format!("{:032x}", bits);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn handle(state: &mut State, args: &[String]) -> Outcome {
    let Some((verb, rest)) = args.split_first() else {
        return Outcome::failed("usage: cf <command> [args...]");
    };
    let (positional, flags) = parse(rest);
    let name = positional.first().cloned().unwrap_or_default();

    match verb.as_str() {
        "push" => {
            if name.is_empty() {
                return Outcome::failed("Incorrect Usage: the required argument `APP_NAME` was not provided");
            }
            let instances = flags
                .get("-i")
                .and_then(|n| n.parse().ok())
                .unwrap_or(1usize);
            let health_check = flags
                .get("-u")
                .or_else(|| flags.get("--health-check-type"))
                .cloned()
                .unwrap_or_else(|| "port".to_string());

            let app = state.apps.entry(name.clone()).or_insert_with(|| MockApp {
                guid: new_guid(),
                process_guid: new_guid(),
                started: false,
                health_check: health_check.clone(),
                instances: Vec::new(),
                logs: Vec::new(),
            });
            app.health_check = health_check;
            app.instances = vec![MockInstance::default(); instances.max(1)];

            let mut out = format!("Pushing app {}...\nOK\n", name);
            if !flags.contains_key("--no-start") {
                app.start();
                out.push_str(&format!("Starting app {}...\nApp started\n", name));
            }
            Outcome::ok(out)
        }

        "start" | "restart" | "restage" => match state.apps.get_mut(&name) {
            Some(app) => {
                app.start();
                Outcome::ok(format!("Starting app {}...\nApp started\nOK\n", name))
            }
            None => Outcome::failed(format!("App '{}' not found", name)),
        },

        "stop" => match state.apps.get_mut(&name) {
            Some(app) => {
                app.started = false;
                Outcome::ok(format!("Stopping app {}...\nOK\n", name))
            }
            None => Outcome::failed(format!("App '{}' not found", name)),
        },

        "delete" => match state.apps.remove(&name) {
            Some(_) => Outcome::ok(format!("Deleting app {}...\nOK\n", name)),
            None => Outcome::ok(format!("App '{}' does not exist.\nOK\n", name)),
        },

        "delete-route" => Outcome::ok("Deleting route...\nOK\n"),

        "app" => match state.apps.get(&name) {
            Some(app) if flags.contains_key("--guid") => Outcome::ok(format!("{}\n", app.guid)),
            Some(app) => {
                let running = app
                    .stats()
                    .resources
                    .iter()
                    .filter(|i| i.state == InstanceState::Running)
                    .count();
                Outcome::ok(format!(
                    "name:              {}\nrequested state:   {}\nhealth check type: {}\ninstances:         {}/{}\n",
                    name,
                    if app.started { "started" } else { "stopped" },
                    app.health_check,
                    running,
                    app.instances.len()
                ))
            }
            None => Outcome::failed(format!("App '{}' not found", name)),
        },

        "apps" => {
            let mut out = String::from("name   requested state   instances\n");
            for (name, app) in &state.apps {
                out.push_str(&format!(
                    "{}   {}   {}\n",
                    name,
                    if app.started { "started" } else { "stopped" },
                    app.instances.len()
                ));
            }
            Outcome::ok(out)
        }

        "logs" => match state.apps.get_mut(&name) {
            Some(app) => {
                if app.started {
                    app.heartbeat();
                }
                Outcome::ok(format!("{}\n", app.logs.join("\n")))
            }
            None => Outcome::failed(format!("App '{}' not found", name)),
        },

        "oauth-token" => Outcome::ok(format!("bearer mock-{:016x}\n", rand::random::<u64>())),

        "curl" => {
            let method = flags.get("-X").map(String::as_str).unwrap_or("GET");
            curl(state, method, &name)
        }

        other => Outcome::failed(format!("'{}' is not a registered command. See 'cf help -a'", other)),
    }
}

fn not_found(what: &str) -> Outcome {
    Outcome::ok(format!(
        "{}\n",
        json!({"errors": [{"code": 10010, "title": "CF-ResourceNotFound", "detail": format!("{} not found", what)}]})
    ))
}

fn document<T: Serialize>(value: &T) -> Outcome {
    match serde_json::to_string_pretty(value) {
        Ok(body) => Outcome::ok(format!("{}\n", body)),
        Err(e) => Outcome::failed(e.to_string()),
    }
}

fn curl(state: &mut State, method: &str, path: &str) -> Outcome {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let down_ms: i64 = std::env::var("MOCK_CF_DOWN_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1500);

    match (method, segments.as_slice()) {
        ("GET", ["v3", "apps", guid, "processes", "web", "stats"]) => {
            match state.apps.values().find(|a| a.guid == *guid) {
                Some(app) => document(&app.stats()),
                None => not_found("App"),
            }
        }

        ("GET", ["v3", "apps", guid, "processes"]) => {
            match state.apps.values().find(|a| a.guid == *guid) {
                Some(app) => document(&ResourceList {
                    resources: vec![Process {
                        guid: app.process_guid.clone(),
                        process_type: "web".to_string(),
                    }],
                }),
                None => not_found("App"),
            }
        }

        ("GET", ["v3", "processes", guid, "stats"]) => {
            match state.apps.values().find(|a| a.process_guid == *guid) {
                Some(app) => document(&app.stats()),
                None => not_found("Process"),
            }
        }

        ("DELETE", ["v3", "apps", guid, "processes", "web", "instances", index]) => {
            let app = state.apps.values_mut().find(|a| a.guid == *guid);
            terminate(app, index, down_ms)
        }

        ("DELETE", ["v3", "processes", guid, "instances", index]) => {
            let app = state.apps.values_mut().find(|a| a.process_guid == *guid);
            terminate(app, index, down_ms)
        }

        ("DELETE", ["v3", "packages" | "droplets", _]) => Outcome::ok(""),

        _ => not_found("Unknown request"),
    }
}

fn terminate(app: Option<&mut MockApp>, index: &str, down_ms: i64) -> Outcome {
    let Some(app) = app else {
        return not_found("Process");
    };
    let instance = index
        .parse::<usize>()
        .ok()
        .and_then(|i| app.instances.get_mut(i));
    match instance {
        Some(instance) => {
            instance.down_until = Some(Utc::now().timestamp_millis() + down_ms);
            Outcome::ok("")
        }
        None => not_found("Instance"),
    }
}

/// `cf logs <app>`: print what is buffered, then a heartbeat until killed
fn stream_logs(home: &Path, args: &[String]) {
    let (positional, _) = parse(args);
    let name = positional.first().cloned().unwrap_or_default();
    let stdout = std::io::stdout();

    let mut printed = 0;
    let deadline = Instant::now() + Duration::from_secs(600);
    while Instant::now() < deadline {
        let snapshot = with_state(home, |state| match state.apps.get_mut(&name) {
            Some(app) => {
                if app.started {
                    app.heartbeat();
                }
                Outcome::ok(app.logs[printed.min(app.logs.len())..].join("\n"))
            }
            None => Outcome::failed(format!("App '{}' not found", name)),
        });

        match snapshot {
            Ok(outcome) if outcome.code == 0 => {
                if !outcome.stdout.is_empty() {
                    printed += outcome.stdout.lines().count();
                    let mut out = stdout.lock();
                    if writeln!(out, "{}", outcome.stdout).and_then(|_| out.flush()).is_err() {
                        return;
                    }
                }
            }
            Ok(outcome) => {
                eprint!("{}", outcome.stderr);
                std::process::exit(outcome.code);
            }
            Err(e) => {
                eprintln!("mock-cf state error: {}", e);
                std::process::exit(1);
            }
        }

        std::thread::sleep(Duration::from_millis(250));
    }
}
