use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_malformed_csv_handling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("robustness_test.csv");
    let mut wtr = csv::Writer::from_path(&path).unwrap();
    wtr.write_record(["op", "user", "amount", "memo", "target"])
        .unwrap();

    // Valid funding
    wtr.write_record(["fund", "1", "100", "", ""]).unwrap();
    // Unknown op
    wtr.write_record(["withdraw", "1", "10", "", ""]).unwrap();
    // Missing amount for pay (required)
    wtr.write_record(["pay", "1", "", "", ""]).unwrap();
    // Valid funding again
    wtr.write_record(["fund", "1", "200", "", ""]).unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("tahub"));
    cmd.arg(&path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading command"))
        .stderr(predicate::str::contains("Error processing command"))
        .stdout(predicate::str::contains("1,300,300,0"));
}

#[test]
fn test_non_positive_payment_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("negative_pay.csv");
    let mut wtr = csv::Writer::from_path(&path).unwrap();
    wtr.write_record(["op", "user", "amount", "memo", "target"])
        .unwrap();

    wtr.write_record(["fund", "1", "1000", "", ""]).unwrap();
    wtr.write_record(["pay", "1", "-5", "x", ""]).unwrap();
    wtr.write_record(["pay", "1", "0", "x", ""]).unwrap();
    wtr.write_record(["fund", "2", "10", "", ""]).unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("tahub"));
    cmd.arg(&path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error processing command"))
        .stdout(predicate::str::contains("1,1000,1000,0"))
        .stdout(predicate::str::contains("2,10,10,0"));
}

#[test]
fn test_invalid_data_types() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data_type_test.csv");
    let mut wtr = csv::Writer::from_path(&path).unwrap();
    wtr.write_record(["op", "user", "amount", "memo", "target"])
        .unwrap();

    // Text in amount field
    wtr.write_record(["fund", "1", "not_a_number", "", ""]).unwrap();
    // Non-integer user id
    wtr.write_record(["fund", "abc", "1", "", ""]).unwrap();
    // Negative amount
    wtr.write_record(["fund", "1", "-5", "", ""]).unwrap();
    // Valid funding
    wtr.write_record(["fund", "1", "5", "", ""]).unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("tahub"));
    cmd.arg(&path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading command"))
        .stdout(predicate::str::contains("1,5,5,0"));
}

#[test]
fn test_asset_commands_report_through_relay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("assets.csv");
    let mut wtr = csv::Writer::from_path(&path).unwrap();
    wtr.write_record(["op", "user", "amount", "memo", "target"])
        .unwrap();
    wtr.write_record(["address", "3", "100", "", "deadbeef"]).unwrap();
    wtr.write_record(["address", "3", "100", "", "zz"]).unwrap();
    wtr.write_record(["mint_address", "3", "5", "", "3q2+7w=="]).unwrap();
    wtr.write_record(["asset_credit", "3", "-1", "", "deadbeef"]).unwrap();
    wtr.write_record(["transfer", "3", "", "", "tapsim1unknown"]).unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("tahub"));
    cmd.arg(&path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("address: tapsim1deadbeef").count(2))
        .stderr(predicate::str::contains("error: failed to parse assetID."))
        .stderr(predicate::str::contains(
            "Error processing command: insufficient balance",
        ))
        .stderr(predicate::str::contains("error: failed to decode address."))
        .stdout(predicate::str::diff("user,current,incoming,outgoing\n"));
}
