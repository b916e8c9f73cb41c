// Copyright 2026 The StreamCore Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

/// Errors shared across crates that do not belong to a single subsystem.
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("resource introspection failed: {0}")]
    Resource(String),
}

pub type CommonResult<T> = Result<T, CommonError>;

/// Renders an error together with its full `source()` chain, one cause per
/// line. Downstream crates use this instead of `anyhow`'s `{:#}` formatter
/// so that log lines stay uniform regardless of which error type raised.
pub fn report_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(c) = cause {
        out.push_str("\ncaused by: ");
        out.push_str(&c.to_string());
        cause = c.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_chain_includes_all_causes() {
        let err = CommonError::InvalidConfig("bad value".to_string());
        assert_eq!(report_chain(&err), "invalid configuration: bad value");
    }
}
