use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const FANO_OUTPUT: &str = "\
User input:
$rem
   METHOD          fano-adc(2)
   BASIS           6-311g
$end

                         Excited State Summary
  Excited state   1  (singlet, A)        [converged]
  Term symbol:  2 (1) A       R^2 = 5.1e-07
  Excitation energy:               4.2000 eV
  Osc. strength:                   0.0100
================================================================================

                         Excited State Summary
  Excited state   1  (singlet, A)        [converged]
  Term symbol:  3 (1) A       R^2 = 2.2e-07
  Excitation energy:             286.4000 eV
  Osc. strength:                   0.0300
================================================================================

           Pump-Probe Results
  Transitions from pumped state 2 (1) A
     3 (1) A      281.0000      0.0400      0.9500
     4 (1) A      283.5000      0.0020      0.4000
        End of Pump-Probe Results
 Total job time:  61.20s(wall), 58.75s(cpu)
        *  Thank you very much for using Q-Chem.  Have a nice day.  *
";

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir should be created");
    }
    fs::write(path, content).expect("file should be written");
}

fn run_qextract(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_qextract"))
        .args(args)
        .output()
        .expect("qextract should run")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("temp path should be utf-8")
}

fn converted_corpus(temp: &TempDir) -> std::path::PathBuf {
    let root = temp.path().join("corpus");
    write_file(&root.join("TRAJ1").join("0.5.out"), FANO_OUTPUT);
    write_file(&root.join("TRAJ1").join("1.0.out"), FANO_OUTPUT);
    write_file(
        &root.join("TRAJ1").join("1.5.out"),
        "$rem\n   BASIS 6-31g\n$end\n",
    );
    write_file(&root.join("TRAJ1_pop.dat"), "0.5 0 1\n1.0 1 0\n1.5 0 1\n");

    let store = temp.path().join("store.json");
    let output = run_qextract(&[
        "convert",
        path_arg(&root),
        "--store",
        path_arg(&store),
    ]);
    assert_eq!(
        output.status.code(),
        Some(0),
        "convert failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("converted 2, skipped 1, population rows written 2"),
        "unexpected summary: {stdout}"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("1.5.out"), "skip should be reported: {stderr}");
    assert_eq!(
        stderr.matches("extracting").count(),
        3,
        "every attempted file should be logged: {stderr}"
    );
    assert!(stderr.contains("0.5.out"));
    store
}

#[test]
fn extract_prints_the_calculation_as_json() {
    let temp = TempDir::new().expect("tempdir should be created");
    let input = temp.path().join("job.out");
    write_file(&input, FANO_OUTPUT);

    let output = run_qextract(&["extract", path_arg(&input), "--compact"]);
    assert_eq!(output.status.code(), Some(0));

    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(value["method"], "fano-adc(2)");
    assert_eq!(value["basis"], "6-311g");
    assert_eq!(value["spectroscopy"]["kind"], "fano");
}

#[test]
fn extract_of_unsupported_method_exits_with_input_code() {
    let temp = TempDir::new().expect("tempdir should be created");
    let input = temp.path().join("cc.out");
    write_file(&input, "$rem\nMETHOD ccsd\n$end\n");

    let output = run_qextract(&["extract", path_arg(&input)]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("INPUT.UNSUPPORTED_METHOD"), "stderr: {stderr}");
}

#[test]
fn convert_writes_a_store_and_skips_malformed_outputs() {
    let temp = TempDir::new().expect("tempdir should be created");
    let store = converted_corpus(&temp);

    let content = fs::read_to_string(&store).expect("store should be readable");
    let value: serde_json::Value = serde_json::from_str(&content).expect("store should be JSON");
    assert_eq!(
        value["TRAJ1"]["0.5"]["2_(1)_A"]["exc_energy"],
        serde_json::json!([281.0, 283.5])
    );
    assert_eq!(value["TRAJ1"]["1.0"]["pop"], serde_json::json!([1.0, 0.0]));
    assert!(value["TRAJ1"].get("1.5").is_none());
}

#[test]
fn reconstruct_and_summary_read_the_converted_store() {
    let temp = TempDir::new().expect("tempdir should be created");
    let store = converted_corpus(&temp);

    let map = temp.path().join("out").join("map.txt");
    let output = run_qextract(&[
        "reconstruct",
        "--store",
        path_arg(&store),
        "--wavelength-start",
        "280",
        "--wavelength-end",
        "285",
        "--wavelength-points",
        "11",
        "--output",
        path_arg(&map),
    ]);
    assert_eq!(
        output.status.code(),
        Some(0),
        "reconstruct failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let rendered = fs::read_to_string(&map).expect("map should be written");
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("time 280.000000"));
    assert!(lines[1].starts_with("0.5 "));
    assert!(lines[2].starts_with("1.0 "));

    let summary = temp.path().join("summary.tsv");
    let output = run_qextract(&[
        "summary",
        "--store",
        path_arg(&store),
        "--trajectory",
        "TRAJ1",
        "--output",
        path_arg(&summary),
        "--time-end",
        "1.5",
    ]);
    assert_eq!(
        output.status.code(),
        Some(0),
        "summary failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let rendered = fs::read_to_string(&summary).expect("summary should be written");
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines[0], "time\tstate");
    assert_eq!(lines[1], "0.0");
    assert!(lines[2].starts_with("0.5\tS1\t281.00\t0.0400"), "row: {}", lines[2]);
    // Ground state is occupied at 1.0 but has no pump-probe datasets.
    assert_eq!(lines[3], "1.0");
}

#[test]
fn reconstruct_without_store_exits_with_io_code() {
    let temp = TempDir::new().expect("tempdir should be created");
    let missing = temp.path().join("missing.json");
    let output = run_qextract(&[
        "reconstruct",
        "--store",
        path_arg(&missing),
        "--wavelength-start",
        "280",
        "--wavelength-end",
        "285",
    ]);
    assert_eq!(output.status.code(), Some(3));
}
