//! `{{await 'name'}}`: consume a value supplied between runs.
//!
//! A missing value ends the run early. The program can be run again once the
//! caller has set it.

use super::TagCall;
use crate::error::{Result, WeaveError};
use crate::program::Flow;
use crate::variables::display_value;
use log::debug;

pub(crate) fn await_(call: &mut TagCall<'_>) -> Result<Flow> {
    call.expect_inline()?;
    call.args.check("await", 1, &["name"])?;
    let name = call
        .args
        .string(0, "name")?
        .ok_or_else(|| WeaveError::Configuration("await needs a variable name".to_string()))?;

    match call.exec.variables_mut().remove(&name) {
        Some(value) => {
            call.exec.output().push(&display_value(&value));
            Ok(Flow::Continue)
        }
        None => {
            debug!("await '{}': no value yet, halting", name);
            Ok(Flow::Halt)
        }
    }
}
