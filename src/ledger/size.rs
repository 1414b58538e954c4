//! Serialized transaction size estimates used for fee calculation

/// Version, locktime and the input/output counts
pub const TX_OVERHEAD_BYTES: usize = 10;

/// Outpoint, signature script for a P2PKH spend and sequence
pub const P2PKH_INPUT_BYTES: usize = 148;

/// Value, script length and a P2PKH locking script
pub const P2PKH_OUTPUT_BYTES: usize = 34;

const OUTPUT_VALUE_BYTES: usize = 8;

fn varint_len(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Serialized size of an output carrying a script of `script_len` bytes
pub fn output_size(script_len: usize) -> usize {
    OUTPUT_VALUE_BYTES + varint_len(script_len) + script_len
}

/// Estimated size of a transaction spending `input_count` P2PKH inputs into
/// outputs with the given script lengths, plus an optional P2PKH change output
pub fn estimate_tx_size(
    input_count: usize,
    output_script_lens: &[usize],
    with_change: bool,
) -> usize {
    let outputs: usize = output_script_lens.iter().map(|len| output_size(*len)).sum();
    let change = if with_change { P2PKH_OUTPUT_BYTES } else { 0 };

    TX_OVERHEAD_BYTES + input_count * P2PKH_INPUT_BYTES + outputs + change
}
