//! Client-order-id policy.
//!
//! Orders sent to the exchange carry `client_order_id = "ae-" + command_id`.
//! The exchange enforces uniqueness on it, which makes a retried place-order
//! return the original order, and lets orders observed on the stream be
//! matched back to the originating command.

/// Prefix of engine-originated client order ids.
pub const CLIENT_ORDER_PREFIX: &str = "ae";

/// Build the deterministic client order id for a command.
pub fn client_order_id(command_id: &str) -> String {
    format!("{CLIENT_ORDER_PREFIX}-{command_id}")
}

/// Extract the command id from a client order id, if it is one of ours.
pub fn parse_client_order_id(client_order_id: &str) -> Option<&str> {
    let rest = client_order_id.strip_prefix(CLIENT_ORDER_PREFIX)?.strip_prefix('-')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Whether a client order id was generated by this engine.
pub fn is_engine_order(client_order_id: &str) -> bool {
    parse_client_order_id(client_order_id).is_some()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let id = client_order_id("550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(id, "ae-550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(
            parse_client_order_id(&id),
            Some("550e8400-e29b-41d4-a716-446655440000")
        );
    }

    #[test]
    fn foreign_ids_are_rejected() {
        assert_eq!(parse_client_order_id("manual-order-123"), None);
        assert_eq!(parse_client_order_id("ae-"), None);
        assert_eq!(parse_client_order_id(""), None);
        assert!(!is_engine_order("x_ae-123"));
    }

    #[test]
    fn prefix_match_is_exact_and_case_sensitive() {
        assert!(is_engine_order("ae-abc"));
        assert!(!is_engine_order("AE-abc"));
        assert!(!is_engine_order("aeabc"));
    }
}
