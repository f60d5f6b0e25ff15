//! Fuzz target for permission-query parsing.
//!
//! The parser must never panic and must either produce a query or a
//! structured error for arbitrary input. Parsed queries are additionally
//! evaluated against a small grant set to exercise the evaluator on
//! whatever trees the fuzzer discovers.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(query) = keygrid_rbac::parse(input) {
            let granted = ["a.*", "b.**", "c"];
            let result = keygrid_rbac::evaluate(&query, &granted);
            if result.valid {
                assert!(result.missing.is_empty());
            }
        }
    }
});
