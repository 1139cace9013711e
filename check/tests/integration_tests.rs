use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const SCHEMA: &str = "Batch DEFINITIONS IMPLICIT TAGS ::=
BEGIN
CallEventRecord ::= SEQUENCE
{
    recordType      [0] INTEGER,
    servedMSISDN    [1] OCTET STRING,
    servingNode     [2] NodeAddress OPTIONAL
}
NodeAddress ::= CHOICE
{
    iPBinV4Address  [0] OCTET STRING OPTIONAL,
    nodeName        [1] IA5String OPTIONAL
}
END
";

// { recordType 19, servedMSISDN '9144770012'H }
const RECORD: [u8; 12] = [
    0x30, 0x0a, 0x80, 0x01, 0x13, 0x81, 0x05, 0x91, 0x44, 0x77, 0x00, 0x12,
];

fn write_fixtures(dir: &Path) {
    std::fs::create_dir_all(dir.join("cdrs")).unwrap();
    std::fs::write(dir.join("schema.asn"), SCHEMA).unwrap();
    std::fs::write(dir.join("cdrs").join("good.dat"), RECORD).unwrap();
    std::fs::write(dir.join("cdrs").join("bad.dat"), [0x13, 0x37, 0x42]).unwrap();
}

fn check(dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_cdr-decoder-check"));
    command
        .arg("-s")
        .arg(dir.join("schema.asn"))
        .arg("-o")
        .arg(dir.join("out"));
    command
}

#[test]
fn test_cli_help_lists_flags() {
    let output = Command::new(env!("CARGO_BIN_EXE_cdr-decoder-check"))
        .arg("--help")
        .output()
        .expect("Failed to execute cdr-decoder-check");

    let stdout = String::from_utf8(output.stdout).unwrap();
    for flag in [
        "--schema",
        "--path",
        "--output-dir",
        "--root-type",
        "--format",
        "--nested-sanitizer",
        "--width",
        "--quiet",
        "--debug",
    ] {
        assert!(stdout.contains(flag), "{flag} missing from:\n{stdout}");
    }
    assert!(stdout.contains("[default: text]"));
    assert!(stdout.contains("[default: Decodificados]"));
}

#[test]
fn test_cli_rejects_invalid_format() {
    let temp_dir = TempDir::new().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_cdr-decoder-check"))
        .arg("-p")
        .arg(temp_dir.path())
        .arg("--format")
        .arg("invalid")
        .output()
        .expect("Failed to execute cdr-decoder-check");

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("invalid"));
}

#[test]
fn test_empty_directory_succeeds() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir(temp_dir.path().join("empty")).unwrap();
    let output = check(temp_dir.path())
        .arg("-p")
        .arg(temp_dir.path().join("empty"))
        .arg("--quiet")
        .output()
        .expect("Failed to execute cdr-decoder-check");
    assert!(output.status.success());
}

#[test]
fn test_bad_file_does_not_stop_the_batch() {
    let temp_dir = TempDir::new().unwrap();
    write_fixtures(temp_dir.path());
    let output = check(temp_dir.path())
        .arg("-p")
        .arg(temp_dir.path().join("cdrs"))
        .output()
        .expect("Failed to execute cdr-decoder-check");

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("bad.dat"), "{stderr}");
    assert!(stderr.contains("DecodeError"), "{stderr}");

    let report =
        std::fs::read_to_string(temp_dir.path().join("out").join("good.dat.txt")).unwrap();
    assert_eq!(report, "{ recordType 19, servedMSISDN '9144770012'H }\n");
    assert!(!temp_dir.path().join("out").join("bad.dat.txt").exists());
}

#[test]
fn test_json_report_for_single_file() {
    let temp_dir = TempDir::new().unwrap();
    write_fixtures(temp_dir.path());
    let output = check(temp_dir.path())
        .arg("-p")
        .arg(temp_dir.path().join("cdrs").join("good.dat"))
        .arg("--format")
        .arg("json")
        .arg("--nested-sanitizer")
        .arg("--quiet")
        .output()
        .expect("Failed to execute cdr-decoder-check");

    assert!(output.status.success());
    let report =
        std::fs::read_to_string(temp_dir.path().join("out").join("good.dat.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&report).unwrap();
    assert_eq!(json["recordType"], 19);
    assert_eq!(json["servedMSISDN"], "9144770012");
}

#[test]
fn test_relative_paths_skip_previous_reports() {
    let temp_dir = TempDir::new().unwrap();
    write_fixtures(temp_dir.path());
    std::fs::remove_file(temp_dir.path().join("cdrs").join("bad.dat")).unwrap();
    let run = || {
        Command::new(env!("CARGO_BIN_EXE_cdr-decoder-check"))
            .current_dir(temp_dir.path())
            .args(["-s", "schema.asn", "-p", ".", "-o", "Decodificados", "--quiet"])
            .output()
            .expect("Failed to execute cdr-decoder-check")
    };

    assert!(!run().status.success(), "schema.asn itself isn't a record");
    let report = temp_dir.path().join("Decodificados").join("good.dat.txt");
    assert_eq!(
        std::fs::read_to_string(&report).unwrap(),
        "{ recordType 19, servedMSISDN '9144770012'H }\n"
    );

    // a second run must not decode the first run's reports
    let stderr = String::from_utf8(run().stderr).unwrap();
    assert!(!stderr.contains("good.dat.txt"), "{stderr}");
    assert!(!temp_dir.path().join("Decodificados").join("good.dat.txt.txt").exists());
}
