// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use thiserror::Error;
use whitebox_common::protocol::{ALREADY_IN_STATE, KERNEL_CONFIGURATION_ERROR, VALIDATION_ERROR};
use whitebox_common::{SessionError, TableId};

use crate::controller::KernelStep;

/// Failure of a single kernel operation.
#[derive(Debug, Error)]
pub enum BackendError {
	#[error("{program} not found in PATH")]
	NotInstalled { program: &'static str },

	#[error("`{program} {args}` failed: {stderr}")]
	CommandFailed {
		program: &'static str,
		args: String,
		stderr: String,
	},

	#[error("`{program} {args}` timed out after {timeout:?}")]
	Timeout {
		program: &'static str,
		args: String,
		timeout: Duration,
	},

	#[error("unexpected output from {program}: {line:?}")]
	UnexpectedOutput { program: &'static str, line: String },

	#[error("link not found: {0}")]
	LinkNotFound(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum NetconfError {
	#[error("invalid request: {0}")]
	Validation(#[from] SessionError),

	#[error("table id {requested} does not match the configured tunnel (table {active})")]
	TableMismatch { requested: TableId, active: TableId },

	#[error("table id {requested} does not match firewall mark {mark} on the device")]
	UnknownTable { requested: TableId, mark: u32 },

	#[error("tunnel already configured on {device} (table {table_id})")]
	AlreadyConfigured { device: String, table_id: TableId },

	#[error("no tunnel configured on {device}")]
	NotConfigured { device: String },

	#[error("{step} failed: {source}")]
	Kernel {
		step: KernelStep,
		#[source]
		source: BackendError,
	},
}

impl NetconfError {
	/// Wire error code for this failure.
	pub fn code(&self) -> &'static str {
		match self {
			NetconfError::Validation(_)
			| NetconfError::TableMismatch { .. }
			| NetconfError::UnknownTable { .. } => VALIDATION_ERROR,
			NetconfError::AlreadyConfigured { .. } | NetconfError::NotConfigured { .. } => {
				ALREADY_IN_STATE
			}
			NetconfError::Kernel { .. } => KERNEL_CONFIGURATION_ERROR,
		}
	}
}

pub type Result<T> = std::result::Result<T, NetconfError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn codes_follow_error_kind() {
		let table = TableId::from_port(51820).unwrap();
		assert_eq!(
			NetconfError::NotConfigured { device: "wg0".into() }.code(),
			ALREADY_IN_STATE
		);
		assert_eq!(
			NetconfError::TableMismatch {
				requested: TableId::from_port(51821).unwrap(),
				active: table,
			}
			.code(),
			VALIDATION_ERROR
		);
		assert_eq!(
			NetconfError::Kernel {
				step: KernelStep::Route,
				source: BackendError::LinkNotFound("wg0".into()),
			}
			.code(),
			KERNEL_CONFIGURATION_ERROR
		);
	}

	#[test]
	fn kernel_error_names_the_step() {
		let err = NetconfError::Kernel {
			step: KernelStep::PolicyRules,
			source: BackendError::CommandFailed {
				program: "ip",
				args: "-4 rule add".into(),
				stderr: "RTNETLINK answers: Operation not permitted".into(),
			},
		};
		assert!(err.to_string().starts_with("install policy rules failed"));
	}
}
