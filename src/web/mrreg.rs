//! X_MS_MediaReceiverRegistrar stub. Answers "authorized and validated"
//! to every request; exists for Xbox-360-style client compatibility and
//! keeps no state.

use crate::error::{Result, UpnpError};
use crate::web::soap::{action_response, ActionRequest, MRREG_SERVICE_TYPE};

pub struct MediaReceiverRegistrarService;

impl MediaReceiverRegistrarService {
    pub fn new() -> Self {
        Self
    }

    pub fn process_action(&self, request: &ActionRequest) -> Result<String> {
        match request.action.as_str() {
            "IsAuthorized" => Ok(action_response(
                &request.action,
                MRREG_SERVICE_TYPE,
                &[("Result", "1".to_string())],
            )),
            "IsValidated" => Ok(action_response(
                &request.action,
                MRREG_SERVICE_TYPE,
                &[("Result", "1".to_string())],
            )),
            "RegisterDevice" => Ok(action_response(
                &request.action,
                MRREG_SERVICE_TYPE,
                &[("RegistrationRespMsg", String::new())],
            )),
            other => {
                Err(UpnpError::invalid_action(format!("unrecognized action: {}", other)).into())
            }
        }
    }

    /// Initial event payload: four zeroed update-id properties.
    pub fn initial_event_properties(&self) -> Vec<(String, String)> {
        [
            "AuthorizationGrantedUpdateID",
            "AuthorizationDeniedUpdateID",
            "ValidationSucceededUpdateID",
            "ValidationRevokedUpdateID",
        ]
        .iter()
        .map(|name| (name.to_string(), "0".to_string()))
        .collect()
    }
}

impl Default for MediaReceiverRegistrarService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: &str) -> ActionRequest {
        ActionRequest {
            action: action.into(),
            service_id: "X_MS_MediaReceiverRegistrar".into(),
            udn: String::new(),
            body: String::new(),
        }
    }

    #[test]
    fn test_always_authorized_and_validated() {
        let service = MediaReceiverRegistrarService::new();
        let authorized = service.process_action(&request("IsAuthorized")).unwrap();
        assert!(authorized.contains("<Result>1</Result>"));
        let validated = service.process_action(&request("IsValidated")).unwrap();
        assert!(validated.contains("<Result>1</Result>"));
    }

    #[test]
    fn test_initial_event_is_zeroed() {
        let service = MediaReceiverRegistrarService::new();
        let properties = service.initial_event_properties();
        assert_eq!(properties.len(), 4);
        assert!(properties.iter().all(|(_, v)| v == "0"));
    }
}
