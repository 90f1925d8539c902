// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Offline verifier for exported audit chains.
//!
//! Reads a JSON array of audit entries and re-checks every hash link from
//! genesis. Exits with status 1 if the chain is broken or unreadable.
//!
//! Usage:
//!   ./verify_audit_export audit.json          # Human-readable output
//!   ./verify_audit_export audit.json --json   # JSON report

use std::path::Path;
use std::process::ExitCode;

use privilege_vault::audit::{AuditChain, AuditEntry, ChainVerification};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let json_mode = args.iter().any(|a| a == "--json");
    let Some(path) = args.iter().find(|a| !a.starts_with("--")) else {
        eprintln!("usage: verify_audit_export <export.json> [--json]");
        return ExitCode::from(2);
    };

    let report = match verify_file(Path::new(path)) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if json_mode {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_human(path, &report);
    }

    if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn verify_file(path: &Path) -> Result<ChainVerification, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let entries: Vec<AuditEntry> =
        serde_json::from_str(&raw).map_err(|e| format!("malformed export: {}", e))?;
    Ok(AuditChain::verify_entries(&entries))
}

fn print_human(path: &str, report: &ChainVerification) {
    println!("Audit export:    {}", path);
    println!("Entries checked: {}", report.entries_checked);
    match report.first_invalid_index {
        None => println!("Result:          VALID"),
        Some(index) => println!("Result:          BROKEN at index {}", index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privilege_vault::audit::{AuditEventType, AuditRecord};
    use std::io::Write;

    fn export(chain: &AuditChain) -> serde_json::Value {
        serde_json::to_value(chain.entries()).unwrap()
    }

    fn write_temp(value: &serde_json::Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        file
    }

    fn sample_chain() -> AuditChain {
        let chain = AuditChain::new();
        for user in ["u1", "u2", "u3"] {
            chain
                .append(AuditRecord::new(AuditEventType::ContextCreated, user).with_client("c1"))
                .unwrap();
        }
        chain
    }

    #[test]
    fn test_valid_export() {
        let file = write_temp(&export(&sample_chain()));

        let report = verify_file(file.path()).unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 3);
    }

    #[test]
    fn test_edited_export_detected() {
        let mut value = export(&sample_chain());
        value[1]["user_id"] = "intruder".into();
        let file = write_temp(&value);

        let report = verify_file(file.path()).unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_invalid_index, Some(1));
    }

    #[test]
    fn test_malformed_export() {
        let file = write_temp(&serde_json::json!({"not": "an array"}));
        assert!(verify_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(verify_file(Path::new("/nonexistent/audit.json")).is_err());
    }
}
