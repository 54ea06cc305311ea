// Copyright: Zgzpls Contributors
// Zaragoza public transport and cinema aggregation service
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::deprecated_clippy_cfg_attr,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

pub mod backup_store;
pub mod bizi;
pub mod cinema;
pub mod errors;
pub mod lines;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod titles;
pub mod tram;
pub mod ttl_cache;
pub mod upstream;

use chrono::SecondsFormat;

/// ISO-8601 timestamp used for `lastUpdated` stamps this service generates
/// itself (sources that carry their own timestamp keep it).
pub fn iso_timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
