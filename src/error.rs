use thiserror::Error;
use crate::chain::JointId;


#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkeletonError {
	#[error("Unknown joint: {0}")]
	UnknownJoint(JointId),

	#[error("Unknown parent {parent} for joint {name:?}")]
	UnknownParent { parent: JointId, name: String },

	#[error("Joint {effector} is not a descendant of joint {root}")]
	NoPath { root: JointId, effector: JointId },
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	#[error("Invalid value for {field}: {message}")]
	InvalidValue { field: &'static str, message: String },
}

impl ConfigError {
	pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
		ConfigError::InvalidValue { field, message: message.into() }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn skeleton_error_display_messages() {
		assert_eq!(SkeletonError::UnknownJoint(4).to_string(), "Unknown joint: 4");
		assert_eq!(
			SkeletonError::UnknownParent { parent: 9, name: "elbow".into() }.to_string(),
			"Unknown parent 9 for joint \"elbow\""
		);
		assert_eq!(
			SkeletonError::NoPath { root: 2, effector: 0 }.to_string(),
			"Joint 0 is not a descendant of joint 2"
		);
	}

	#[test]
	fn config_error_display_messages() {
		assert_eq!(
			ConfigError::invalid("times_per_frame", "must be >= 0").to_string(),
			"Invalid value for times_per_frame: must be >= 0"
		);
	}

	#[test]
	fn config_error_from_toml() {
		let err = toml::from_str::<toml::Value>("= broken").unwrap_err();
		let config_err: ConfigError = err.into();
		assert!(matches!(config_err, ConfigError::Toml(_)));
	}
}
