//! Property-based tests for connection creation and the hand-off slots
//!
//! These tests verify that:
//! - Valid settings always create exactly one retrievable connection
//! - Invalid settings never register anything
//! - Row records keep one field per column whatever the values contain

#[cfg(test)]
mod tests {
    use bgsql::core::db::FIELD_SEPARATOR;
    use bgsql::{Api, BgsqlError, Library, Row};
    use proptest::prelude::*;

    // Test infrastructure

    /// Small thread limits keep each case cheap to spawn and join.
    fn arb_valid_settings() -> impl Strategy<Value = (i64, i64, i64)> {
        (0i64..=10_000, 1i64..=4).prop_flat_map(|(async_timeout, threads)| {
            let blocking = if async_timeout == 0 {
                (0i64..=10_000).boxed()
            } else {
                (0i64..=async_timeout).boxed()
            };
            (Just(async_timeout), blocking, Just(threads))
        })
    }

    fn arb_invalid_settings() -> impl Strategy<Value = (i64, i64, i64)> {
        prop_oneof![
            // Negative timeouts
            (i64::MIN..0, 0i64..100, 1i64..4),
            (0i64..100, i64::MIN..0, 1i64..4),
            // Blocking longer than a bounded async timeout
            (1i64..1000).prop_flat_map(|a| (Just(a), (a + 1)..=(a + 1000), 1i64..4)),
            // No worker threads
            (0i64..100, 0i64..100, i64::MIN..=0),
        ]
    }

    fn api() -> Api {
        let api = Api::default();
        api.initialize();
        api
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_valid_settings_create_one_connection((async_timeout, blocking, threads) in arb_valid_settings()) {
            let api = api();
            prop_assert!(api.create_connection("Sqlite", async_timeout, blocking, threads).is_ok());

            let id = api.get_connection();
            prop_assert!(id.is_some());
            prop_assert_eq!(api.get_connection(), None);

            let id = id.unwrap();
            prop_assert!(!id.is_empty());
            prop_assert_eq!(api.quote(&id, "x"), Ok("x".to_string()));
            prop_assert!(api.release_connection(&id).is_ok());
        }

        #[test]
        fn prop_invalid_settings_register_nothing((async_timeout, blocking, threads) in arb_invalid_settings()) {
            let api = api();
            let result = api.create_connection("Sqlite", async_timeout, blocking, threads);
            prop_assert!(matches!(result, Err(BgsqlError::InvalidArgument(_))));
            prop_assert_eq!(api.get_connection(), None);
        }

        #[test]
        fn prop_row_record_has_one_field_per_column(
            values in prop::collection::vec(prop::option::of("[^\u{1f}]{0,12}"), 1..8)
        ) {
            let row = Row::new(values.clone());
            let record = row.to_record();
            prop_assert_eq!(record.split(FIELD_SEPARATOR).count(), values.len());
            for (field, value) in record.split(FIELD_SEPARATOR).zip(&values) {
                prop_assert_eq!(field, value.as_deref().unwrap_or("NULL"));
            }
        }
    }

    #[test]
    fn test_unsupported_engine_registers_nothing() {
        let api = Api::with_library(Library::new());
        let result = api.create_connection("SqlServer", 0, 0, 1);
        assert!(matches!(result, Err(BgsqlError::InvalidArgument(msg)) if msg.contains("not supported")));
        assert_eq!(api.get_connection(), None);
    }
}
