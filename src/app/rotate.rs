use crate::core::host::HostRecord;
use crate::core::reporter::Reporter;
use crate::core::workflow::rotate;
use crate::error::Result;

pub fn run(host_override: Option<&str>, reporter: &mut dyn Reporter) -> Result<HostRecord> {
    let outcome = rotate::run(host_override, reporter)?;
    let record = super::emit_outcome(outcome, reporter);
    println!("rotated keys for `{}`", record.name);
    Ok(record)
}
