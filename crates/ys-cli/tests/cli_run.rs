use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_yieldscan"))
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("yieldscan_cli_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn write_inputs(dir: &Path) {
    std::fs::write(
        dir.join("tt_0.json"),
        r#"{"columns": {"met": [50, 150, 250, 350], "jets_pt": [[40], [], [90, 30], [10]]}}"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("tt_1.json"),
        r#"{"columns": {"met": [199.9, 200, 10], "jets_pt": [[], [60], []]}}"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("data.json"),
        r#"{"columns": {"met": [100, 300], "jets_pt": [[], []]}}"#,
    )
    .unwrap();
}

const RUN_YAML: &str = r#"schema_version: yieldscan_run_v0
luminosity: 2
out_dir: out
execution:
  multithreaded: MULTI
source:
  fields:
    met: scalar
    jets_pt: vector
processes:
  - name: ttbar
    kind: background
    inputs: ["tt_*.json"]
    weight: "0.5"
  - name: sig
    kind: signal
    inputs: ["tt_1.json"]
    cut: "met > 100"
  - name: obs
    kind: data
    inputs: ["data.json"]
tables:
  - name: cutflow
    rows:
      - label: Baseline
        separator: true
      - label: low
        cut: "met < 200"
      - label: high
        cut: "met >= 200"
      - label: hard jet
        cut: "jets_pt > 50"
histograms:
  - name: met
    variable: met
    edges: [0, 100, 200, 400]
    processes: [ttbar, obs]
hist2d:
  - name: met_vs_njets
    x: {variable: met, bins: 4, low: 0, high: 400}
    y: {variable: "count(jets_pt > 30)", edges: [0, 1, 2, 3]}
    processes: [ttbar]
event_scans:
  - name: hard
    cut: "met > 150"
    columns: [met, jets_pt]
    processes: [sig]
kappas:
  - name: high_over_low
    table: cutflow
    toys:
      n_toys: 2000
      seed: 7
    observables:
      - row: high
      - row: low
        power: -1
"#;

fn write_config(dir: &Path, multithreaded: bool) -> PathBuf {
    let path = dir.join("run.yaml");
    std::fs::write(&path, RUN_YAML.replace("MULTI", &multithreaded.to_string())).unwrap();
    path
}

fn read_summary(dir: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(dir.join("out").join("summary.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn run_scans_each_input_once_and_writes_outputs() {
    let dir = tmp_dir("run");
    write_inputs(&dir);
    let config = write_config(&dir, true);

    let out = run(&["run", "--config", config.to_str().unwrap(), "--threads", "2"]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let summary = read_summary(&dir);
    assert_eq!(summary["schema_version"], "yieldscan_summary_v0");
    let sources = summary["scan"]["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 3, "sig shares tt_1.json with ttbar");
    let rows: u64 = sources.iter().map(|s| s["rows"].as_u64().unwrap()).sum();
    assert_eq!(rows, 9);
    assert_eq!(summary["scan"]["figures"], 4);

    // ttbar: 4 rows below 200 and 3 above, weight 0.5, luminosity 2.
    let kappa = &summary["kappas"][0];
    assert_eq!(kappa["name"], "high_over_low");
    let yields: Vec<f64> =
        kappa["yields"].as_array().unwrap().iter().map(|v| v.as_f64().unwrap()).collect();
    assert!((yields[0] - 3.0).abs() < 1e-9, "{yields:?}");
    assert!((yields[1] - 4.0).abs() < 1e-9, "{yields:?}");
    let value = kappa["estimate"]["value"].as_f64().unwrap();
    assert!((value - 0.75).abs() < 1e-9, "kappa={value}");
    assert!(kappa["estimate"]["down"].as_f64().unwrap() > 0.0);
    assert!(kappa["estimate"]["up"].as_f64().unwrap() > 0.0);

    let table = std::fs::read_to_string(dir.join("out").join("cutflow_lumi_2.txt")).unwrap();
    assert!(table.contains("ttbar"));
    assert!(table.contains("hard jet"));
    let hist: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.join("out").join("met_lumi_2.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(hist["edges"].as_array().unwrap().len(), 4);

    // ttbar (weight 0.5, L = 2) in (met bin, jets above 30): 10 and 50 in the
    // first met bin with 0 and 1 jets, 150 and 199.9 with none, 250 and 200
    // with one, 350 with none.
    let h2: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.join("out").join("met_vs_njets_lumi_2.json")).unwrap(),
    )
    .unwrap();
    let tt = &h2["processes"][0];
    assert_eq!(tt["entries"], 7);
    assert_eq!(tt["contents"][0][0], 1.0);
    assert_eq!(tt["contents"][0][1], 1.0);
    assert_eq!(tt["contents"][1][0], 2.0);
    assert_eq!(tt["contents"][2][1], 2.0);
    assert_eq!(tt["contents"][3][0], 1.0);

    // sig keeps met > 100 from tt_1.json; the scan adds met > 150.
    let scan = std::fs::read_to_string(dir.join("out").join("hard_scan_sig_lumi_2.txt")).unwrap();
    let lines: Vec<&str> = scan.lines().collect();
    assert_eq!(lines.len(), 3, "{scan}");
    assert!(lines[0].contains("Instance"));
    assert!(lines[1].contains("199.90"));
    assert!(lines[2].ends_with("200.00    60.00"));
}

#[test]
fn threaded_and_sequential_runs_produce_identical_outputs() {
    let seq = tmp_dir("seq");
    write_inputs(&seq);
    let cfg = write_config(&seq, false);
    let out = run(&["run", "--config", cfg.to_str().unwrap()]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let mt = tmp_dir("mt");
    write_inputs(&mt);
    let cfg = write_config(&mt, true);
    let out = run(&["run", "--config", cfg.to_str().unwrap(), "--threads", "3"]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let read = |d: &Path, f: &str| std::fs::read_to_string(d.join("out").join(f)).unwrap();
    assert_eq!(read(&seq, "cutflow_lumi_2.txt"), read(&mt, "cutflow_lumi_2.txt"));
    assert_eq!(read(&seq, "met_lumi_2.json"), read(&mt, "met_lumi_2.json"));
    assert_eq!(
        read_summary(&seq)["kappas"][0]["estimate"],
        read_summary(&mt)["kappas"][0]["estimate"]
    );
}

#[test]
fn validate_reports_bad_references_without_reading_inputs() {
    let dir = tmp_dir("validate_bad");
    let cfg = dir.join("run.yaml");
    let yaml = RUN_YAML
        .replace("MULTI", "true")
        .replace("processes: [ttbar, obs]", "processes: [ttbar, wjets]");
    std::fs::write(&cfg, yaml).unwrap();

    let out = run(&["validate", "--config", cfg.to_str().unwrap()]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("unknown process 'wjets'"), "stderr={stderr}");
}

#[test]
fn validate_accepts_good_config() {
    let dir = tmp_dir("validate_ok");
    let cfg = write_config(&dir, true);
    let out = run(&["validate", "--config", cfg.to_str().unwrap()]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["ok"], true);
    assert_eq!(v["kappas"][0], "high_over_low");
}

#[test]
fn rejects_unknown_schema_version() {
    let dir = tmp_dir("schema");
    let cfg = dir.join("run.yaml");
    std::fs::write(&cfg, "schema_version: something_else\nprocesses: []\n").unwrap();
    let out = run(&["validate", "--config", cfg.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unsupported schema_version"));
}
