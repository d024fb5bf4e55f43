//! Control command implementation

use std::path::Path;

use anyhow::Result;

use hansel_core::ClientPattern;

use crate::control::ControlClient;
use crate::output::{format_records, format_records_json, print_error};

/// Query the running server for clients matching `hosts`
///
/// The pattern is compiled before anything is sent, so an invalid
/// expression never reaches the server.
pub async fn control_command(socket_path: &Path, hosts: &str, json: bool) -> Result<()> {
    let pattern = ClientPattern::new(hosts)?;

    let client = ControlClient::new(socket_path);
    let records = match client.query(&pattern).await {
        Ok(records) => records,
        Err(e) => {
            print_error(&format!("Control query failed: {:#}", e));
            return Err(e);
        }
    };

    tracing::debug!("Control query '{}' matched {} clients", hosts, records.len());

    if json {
        println!("{}", format_records_json(&records)?);
    } else {
        println!("{}", format_records(&records));
    }
    Ok(())
}
