use super::*;

#[test]
fn test_state_as_str() {
    assert_eq!(ServiceState::WaitingHealth.as_str(), "waiting_health");
    assert_eq!(format!("{}", ServiceState::Degraded), "degraded");
}

#[test]
fn test_serializes_snake_case() {
    let json = serde_json::to_string(&ServiceState::WaitingHealth).unwrap();
    assert_eq!(json, "\"waiting_health\"");
}

#[test]
fn test_happy_path_is_legal() {
    let mut table = StateTable::new(["api"]);
    for to in [
        ServiceState::Starting,
        ServiceState::WaitingHealth,
        ServiceState::Ready,
        ServiceState::Stopping,
        ServiceState::Stopped,
    ] {
        assert!(table.transition("api", to), "transition to {} refused", to);
    }
    assert_eq!(table.get("api"), Some(ServiceState::Stopped));
    assert_eq!(table.history().len(), 5);
}

#[test]
fn test_port_refusal_goes_straight_to_terminal() {
    let mut table = StateTable::new(["ui", "api"]);
    assert!(table.transition("ui", ServiceState::Degraded));
    assert!(table.transition("api", ServiceState::Failed));
}

#[test]
fn test_illegal_transition_refused() {
    let mut table = StateTable::new(["api"]);
    assert!(!table.transition("api", ServiceState::Ready));
    assert_eq!(table.get("api"), Some(ServiceState::Stopped));
    assert!(table.history().is_empty());
}

#[test]
fn test_unknown_service_refused() {
    let mut table = StateTable::new(["api"]);
    assert!(!table.transition("ghost", ServiceState::Starting));
    assert_eq!(table.get("ghost"), None);
}

#[test]
fn test_history_is_ordered_per_service() {
    let mut table = StateTable::new(["a", "b"]);
    table.transition("a", ServiceState::Starting);
    table.transition("b", ServiceState::Starting);
    table.transition("a", ServiceState::WaitingHealth);

    let a: Vec<_> = table.history_of("a").iter().map(|t| t.to).collect();
    assert_eq!(a, vec![ServiceState::Starting, ServiceState::WaitingHealth]);
    assert_eq!(table.history()[1].service, "b");
}

#[test]
fn test_settled_states() {
    assert!(ServiceState::Ready.is_settled());
    assert!(ServiceState::Degraded.is_settled());
    assert!(ServiceState::Failed.is_settled());
    assert!(!ServiceState::WaitingHealth.is_settled());
    assert!(!ServiceState::Stopped.is_settled());
}
