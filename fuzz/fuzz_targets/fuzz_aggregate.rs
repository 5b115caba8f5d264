//! Fuzz target for warehouse availability parsing.
//!
//! Arbitrary bodies must never panic the parser or overflow the total.

#![no_main]

use libfuzzer_sys::fuzz_target;
use stock_sync::authority::{aggregate_available, parse_availability, StockRecord};

fuzz_target!(|data: (&[u8], Vec<(i64, i64, Option<i64>)>)| {
    let (body, raw) = data;

    let _ = parse_availability(body);

    let records: Vec<StockRecord> = raw
        .into_iter()
        .map(|(quantity, reserved, available)| StockRecord {
            quantity,
            reserved,
            available,
        })
        .collect();
    let total = aggregate_available(&records);
    for record in &records {
        assert!(total >= record.available_units());
    }
});
