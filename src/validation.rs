use crate::error::{FieldError, GroundGameError, Result};
use crate::models::{Coordinates, VisitRequest};

/// Validation utilities for input sanitization and edge case handling
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a latitude/longitude pair
    pub fn validate_coordinates(coordinates: Coordinates) -> Result<()> {
        let mut errors = Vec::new();
        if !coordinates.latitude.is_finite() || !(-90.0..=90.0).contains(&coordinates.latitude) {
            errors.push(FieldError::new("latitude", "must be between -90 and 90"));
        }
        if !coordinates.longitude.is_finite() || !(-180.0..=180.0).contains(&coordinates.longitude) {
            errors.push(FieldError::new("longitude", "must be between -180 and 180"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GroundGameError::ValidationFailed {
                entity: "visit",
                errors,
            })
        }
    }

    /// Validate visit duration and convert it to seconds
    pub fn validate_duration(duration_sec: i64) -> Result<u32> {
        if duration_sec < 0 {
            return Err(GroundGameError::invalid("visit", "duration_sec", "must not be negative"));
        }
        u32::try_from(duration_sec)
            .map_err(|_| GroundGameError::invalid("visit", "duration_sec", "is too large"))
    }

    /// Validate the shape of a visit request before any lookups happen
    pub fn validate_visit_request(request: &VisitRequest) -> Result<u32> {
        let duration = Self::validate_duration(request.duration_sec)?;

        match (request.submitted_latitude, request.submitted_longitude) {
            (Some(latitude), Some(longitude)) => {
                Self::validate_coordinates(Coordinates::new(latitude, longitude))?;
            }
            (None, None) => {}
            _ => {
                return Err(GroundGameError::invalid(
                    "visit",
                    "submitted_longitude",
                    "latitude and longitude must be submitted together",
                ))
            }
        }

        if let Some(address) = &request.address {
            match (address.latitude, address.longitude) {
                (Some(latitude), Some(longitude)) => {
                    Self::validate_coordinates(Coordinates::new(latitude, longitude)).map_err(|err| {
                        match err {
                            GroundGameError::ValidationFailed { errors, .. } => {
                                GroundGameError::ValidationFailed {
                                    entity: "address",
                                    errors,
                                }
                            }
                            other => other,
                        }
                    })?;
                }
                (None, None) => {}
                _ => {
                    return Err(GroundGameError::invalid(
                        "address",
                        "longitude",
                        "latitude and longitude must be supplied together",
                    ))
                }
            }
        }

        Ok(duration)
    }

    /// Sanitize text input, mapping blank strings to `None`
    #[must_use]
    pub fn sanitize_text(text: &str) -> Option<String> {
        let cleaned = text
            .chars()
            .filter(|c| !c.is_control() || *c == '\t')
            .collect::<String>()
            .trim()
            .to_string();
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    }

    /// Sanitize an optional text attribute from a payload
    #[must_use]
    pub fn sanitize_optional(text: Option<&String>) -> Option<String> {
        text.and_then(|t| Self::sanitize_text(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AddressPayload;

    #[test]
    fn test_negative_duration_rejected() {
        assert!(InputValidator::validate_duration(-1).is_err());
        assert_eq!(InputValidator::validate_duration(200).unwrap(), 200);
    }

    #[test]
    fn test_half_coordinates_rejected() {
        let request = VisitRequest {
            duration_sec: 10,
            submitted_latitude: Some(1.0),
            ..VisitRequest::default()
        };
        assert!(InputValidator::validate_visit_request(&request).is_err());
    }

    #[test]
    fn test_address_coordinates_report_address_entity() {
        let request = VisitRequest {
            duration_sec: 10,
            address: Some(AddressPayload {
                latitude: Some(91.0),
                longitude: Some(0.0),
                ..AddressPayload::default()
            }),
            ..VisitRequest::default()
        };
        match InputValidator::validate_visit_request(&request) {
            Err(GroundGameError::ValidationFailed { entity, errors }) => {
                assert_eq!(entity, "address");
                assert_eq!(errors[0].field, "latitude");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_sanitize_text_blank_is_none() {
        assert_eq!(InputValidator::sanitize_text("  \n "), None);
        assert_eq!(InputValidator::sanitize_text(" 5th\u{0} Avenue "), Some("5th Avenue".to_string()));
    }
}
