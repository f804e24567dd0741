//! Conservative fee estimation shared by the new-denoms workflow (§4.6.3)
//! and the keypair-cache sizing algorithm (§4.5). Both must agree with each
//! other and with what the network accepts for standard transactions.

/// Average signed P2PKH input size in bytes.
pub const AVG_SIGNATURE_INPUT_SIZE: u64 = 148;
/// Worst-case signed P2PKH input size, used when `max_size` is requested.
pub const MAX_SIGNATURE_INPUT_SIZE: u64 = 149;
pub const P2PKH_OUTPUT_SIZE: u64 = 34;
const TX_OVERHEAD_BYTES: u64 = 10;
/// Flat duffs-per-byte fee rate. The core never estimates dynamic fees
/// itself (spec §7 `NoDynamicFeeEstimates` is a collaborator-reported
/// condition); this is the model used once a rate is known to be available.
pub const FEE_RATE_PER_BYTE: u64 = 1;

pub fn input_size(max_size: bool) -> u64 {
    if max_size {
        MAX_SIGNATURE_INPUT_SIZE
    } else {
        AVG_SIGNATURE_INPUT_SIZE
    }
}

pub fn estimate_tx_fee(num_inputs: usize, num_outputs: usize, max_size: bool) -> u64 {
    let size = num_inputs as u64 * input_size(max_size) + num_outputs as u64 * P2PKH_OUTPUT_SIZE + TX_OVERHEAD_BYTES;
    size * FEE_RATE_PER_BYTE
}
