// Panic payload handling for isolated job runs
use std::any::Any;

/// Readable message of a caught panic payload
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extracts_message_from_spawned_panic() {
        let handle: tokio::task::JoinHandle<()> = tokio::spawn(async { panic!("poll exploded") });
        let err = handle.await.unwrap_err();
        assert!(err.is_panic());
        assert_eq!(panic_message(err.into_panic()), "poll exploded");
    }

    #[test]
    fn test_unknown_payload() {
        assert_eq!(panic_message(Box::new(42_u8)), "Unknown panic");
    }
}
