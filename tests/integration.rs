use std::{env, fs, path::PathBuf, process::Command};

const CONFIG: &str = r#"
[global]
seed = 42
max_complaints = 3
max_hearing_rounds = 2
licenses = 1

[world]
width = 8
height = 6
cell_width = 10.0
cell_height = 10.0
topology = "torus"
good_spot_frequency = 0.25
blocking_radius = 10.0
damage_radius = 20.0
damage_proportion = 0.3

[fisherman]
num = 6
voting = "network"

[fisherman.priorities]
OwnProfits = 1.0
NaturalFishHealth = 0.5

[fisherman.learning]
elitism = 2
crossover_rate = 0.3
mutation_rate = 0.1

[aquaculture]
voting = "rules"
work_efficiency = 2.0
taxation = 0.2

[aquaculture.priorities]
OwnProfits = 1.0

[aquaculture.learning]
elitism = 1
crossover_rate = 0.5
mutation_rate = 0.2

[civilian]
num = 2
voting = "rules"

[civilian.priorities]
CommunityWealth = 1.0

[tourist]
num = 2
voting = "rules"
care_radius = 15.0

[tourist.priorities]
NonintrusiveAquaculture = 1.0

[government]
approval = "probability"
approval_probability = 0.3

[output]
rounds = 4
save_reports = true
"#;

fn run_bin(args: &[&str]) -> std::process::Output {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_fishsim"));

    Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command")
}

fn assert_success(args: &[&str]) {
    let output = run_bin(args);

    let stdout_str =
        std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
    let stderr_str =
        std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

    assert!(
        output.status.success(),
        "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
    );
}

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    fs::write(test_dir.join("config.toml"), CONFIG).expect("failed to write config file");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert_success(&["--sim-dir", test_dir_str, "create"]);
    assert_success(&["--sim-dir", test_dir_str, "create"]);

    for run in ["run-0000", "run-0001"] {
        let run_dir = test_dir.join(run);
        for file in ["snapshot.msgpack", "trajectory.msgpack", "rounds.msgpack"] {
            assert!(run_dir.join(file).is_file(), "missing {run}/{file}");
        }
    }

    assert_success(&["--sim-dir", test_dir_str, "analyze"]);

    let results = fs::read_to_string(test_dir.join("run-0000").join("results.json"))
        .expect("failed to read results");
    let results: serde_json::Value =
        serde_json::from_str(&results).expect("failed to parse results");
    assert_eq!(results["n_rounds"], 4);

    assert_success(&["--sim-dir", test_dir_str, "clean"]);
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn invalid_config_fails() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("invalid_config_fails");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    let config = CONFIG.replace("topology = \"torus\"", "topology = \"sphere\"");
    fs::write(test_dir.join("config.toml"), config).expect("failed to write config file");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");
    let output = run_bin(&["--sim-dir", test_dir_str, "create"]);
    assert!(!output.status.success());
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}
