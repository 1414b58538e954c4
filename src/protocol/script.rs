//! Unspendable data-carrying output scripts

pub const OP_FALSE: u8 = 0x00;
pub const OP_RETURN: u8 = 0x6a;

/// Size of the `OP_FALSE OP_RETURN` prefix written by [`data_output_script`]
pub const DATA_SCRIPT_PREFIX_LEN: usize = 2;

/// Wrap a record payload in an `OP_FALSE OP_RETURN` output script
pub fn data_output_script(payload: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(DATA_SCRIPT_PREFIX_LEN + payload.len());
    script.push(OP_FALSE);
    script.push(OP_RETURN);
    script.extend_from_slice(payload);
    script
}

/// Record payload carried by a data output, or `None` for any other script.
///
/// Both `OP_FALSE OP_RETURN` and legacy bare `OP_RETURN` prefixes are accepted.
pub fn data_payload(script: &[u8]) -> Option<&[u8]> {
    match script {
        [OP_FALSE, OP_RETURN, rest @ ..] => Some(rest),
        [OP_RETURN, rest @ ..] => Some(rest),
        _ => None,
    }
}

pub fn is_data_output(script: &[u8]) -> bool {
    data_payload(script).is_some()
}
