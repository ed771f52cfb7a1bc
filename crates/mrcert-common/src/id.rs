/// Hex digits of the millisecond timestamp at the front of a UUID v7.
const TIMESTAMP_HEX: usize = 12;

/// Hex digits kept from the random tail of the UUID.
const RANDOM_HEX: usize = 8;

/// Directory name for a scratch workspace, e.g. `0196a3b4c5d6-9f0e1a2b`.
///
/// The timestamp prefix makes retained workspaces list in creation order.
/// The random suffix keeps names distinct within one millisecond.
pub fn scratch_name() -> String {
    let full = uuid::Uuid::now_v7().simple().to_string();
    format!(
        "{}-{}",
        &full[..TIMESTAMP_HEX],
        &full[full.len() - RANDOM_HEX..]
    )
}
