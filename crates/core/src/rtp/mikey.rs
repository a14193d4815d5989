//! MIKEY pre-shared-key message encode/parse, RFC 3830,
//! restricted to the PSK transport used by SDP's `a=key-mgmt` attribute
//! (RFC 4567). Only the subset needed to carry an SRTP master key, salt,
//! and MKI is implemented; full Diffie-Hellman and public-key transports
//! are out of scope.

use crate::error::{Result, RtspError};
use crate::rtp::srtp::{MASTER_KEY_LEN, MASTER_SALT_LEN, MKI_LEN};

const MIKEY_VERSION: u8 = 1;
const TYPE_PSK_INIT: u8 = 0;

const PAYLOAD_LAST: u8 = 0;
const PAYLOAD_T: u8 = 5;
const PAYLOAD_SP: u8 = 10;
const PAYLOAD_KEMAC: u8 = 1;

/// Encryption algorithm identifiers inside the Key Data sub-payload
/// (RFC 3830 §6.13). Only NULL is accepted for encryption here since the
/// MIKEY message itself rides inside the already-authenticated RTSP
/// control channel; AES-KW is named but rejected.
const ENCR_ALG_NULL: u8 = 0;
const ENCR_ALG_AES_KW_128: u8 = 2;

/// The material an SDP `a=key-mgmt` MIKEY message carries for one crypto
/// session: the SRTP master key and salt, plus the MKI carried alongside
/// them so SRTP packets can name which key generation encrypted them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MikeyKeyMaterial {
    pub master_key: [u8; MASTER_KEY_LEN],
    pub master_salt: [u8; MASTER_SALT_LEN],
    pub mki: [u8; MKI_LEN],
    pub csb_id: u32,
}

/// Build a minimal MIKEY PSK-mode message carrying one crypto session
/// with a NULL-encrypted Key Data payload: the key travels in the clear
/// at the MIKEY layer, relying on RTSP Digest auth / TLS for transport
/// confidentiality.
pub fn encode(material: &MikeyKeyMaterial) -> Vec<u8> {
    let mut out = Vec::new();

    // Common Header payload (RFC 3830 §6.1).
    out.push((MIKEY_VERSION << 4) | 0); // version nibble unused beyond constant
    out[0] = MIKEY_VERSION;
    out.push(TYPE_PSK_INIT);
    out.push(PAYLOAD_T); // next payload: Timestamp
    out.push(0); // V bit / PRF func, both zero
    out.extend_from_slice(&material.csb_id.to_be_bytes());
    out.push(1); // #CS
    out.push(0); // CS ID map type: SRTP-ID
    out.push(0); // CS ID map info (policy 0, SSRC 0) placeholder

    // Timestamp payload: NTP-UTC, 8 bytes, next payload KEMAC.
    out.push(PAYLOAD_KEMAC);
    out.push(0); // TS type: NTP-UTC
    out.extend_from_slice(&[0u8; 8]);

    // KEMAC payload carrying one Key Data sub-payload, NULL encrypted,
    // next payload SP (Security Policy).
    out.push(PAYLOAD_SP);
    out.push(ENCR_ALG_NULL << 4); // encr alg nibble | mac alg nibble (mac=0/NULL)
    let key_data_len = 1 + 2 + MASTER_KEY_LEN + 2 + MASTER_SALT_LEN + 1 + MKI_LEN;
    out.extend_from_slice(&(key_data_len as u16).to_be_bytes());
    out.push(2); // Key type: TGK + salt
    out.extend_from_slice(&((MASTER_KEY_LEN as u16) * 8).to_be_bytes());
    out.extend_from_slice(&material.master_key);
    out.extend_from_slice(&((MASTER_SALT_LEN as u16) * 8).to_be_bytes());
    out.extend_from_slice(&material.master_salt);
    out.push(MKI_LEN as u8); // SPI/MKI length
    out.extend_from_slice(&material.mki);

    // Security Policy payload, terminal (next payload = Last).
    out.push(PAYLOAD_LAST);
    out.extend_from_slice(&0u32.to_be_bytes()); // policy #0, SRTP type

    out
}

/// Parse a MIKEY PSK message and extract the SRTP key material, rejecting
/// anything but NULL encryption on the Key Data payload.
pub fn parse(message: &[u8]) -> Result<MikeyKeyMaterial> {
    if message.len() < 10 {
        return Err(RtspError::MikeyParse("message too short".into()));
    }

    let version = message[0];
    if version != MIKEY_VERSION {
        return Err(RtspError::MikeyParse(format!("unsupported version {version}")));
    }

    let csb_id = u32::from_be_bytes([message[4], message[5], message[6], message[7]]);
    let num_cs = message[8];
    if num_cs != 1 {
        return Err(RtspError::MikeyParse("only one crypto session supported".into()));
    }

    // Skip: num_cs(1) already read at [8]; CS ID map type(1) + info(1) at [9..11].
    let mut offset = 11;

    if offset + 2 > message.len() {
        return Err(RtspError::MikeyParse("truncated after CS ID map".into()));
    }
    let ts_next = message[offset];
    offset += 2; // next-payload + TS type
    offset += 8; // NTP-UTC timestamp body

    if ts_next != PAYLOAD_KEMAC {
        return Err(RtspError::MikeyParse("expected KEMAC payload after timestamp".into()));
    }

    if offset + 3 > message.len() {
        return Err(RtspError::MikeyParse("truncated KEMAC header".into()));
    }
    let encr_alg = message[offset + 1] >> 4;
    let key_data_len = u16::from_be_bytes([message[offset + 2], message[offset + 3]]) as usize;
    offset += 4;

    if encr_alg == ENCR_ALG_AES_KW_128 {
        return Err(RtspError::MikeyParse(
            "AES-KW-128 key encryption is not supported".into(),
        ));
    }
    if encr_alg != ENCR_ALG_NULL {
        return Err(RtspError::MikeyParse(format!(
            "unsupported key encryption algorithm {encr_alg}"
        )));
    }

    if offset + key_data_len > message.len() {
        return Err(RtspError::MikeyParse("truncated Key Data payload".into()));
    }

    let key_type = message[offset];
    if key_type != 2 {
        return Err(RtspError::MikeyParse("expected TGK+salt key type".into()));
    }
    let mut cursor = offset + 1;

    let key_bits = u16::from_be_bytes([message[cursor], message[cursor + 1]]);
    cursor += 2;
    if key_bits as usize != MASTER_KEY_LEN * 8 {
        return Err(RtspError::MikeyParse("unexpected master key length".into()));
    }
    let mut master_key = [0u8; MASTER_KEY_LEN];
    master_key.copy_from_slice(&message[cursor..cursor + MASTER_KEY_LEN]);
    cursor += MASTER_KEY_LEN;

    let salt_bits = u16::from_be_bytes([message[cursor], message[cursor + 1]]);
    cursor += 2;
    if salt_bits as usize != MASTER_SALT_LEN * 8 {
        return Err(RtspError::MikeyParse("unexpected master salt length".into()));
    }
    let mut master_salt = [0u8; MASTER_SALT_LEN];
    master_salt.copy_from_slice(&message[cursor..cursor + MASTER_SALT_LEN]);
    cursor += MASTER_SALT_LEN;

    if cursor + 1 > message.len() {
        return Err(RtspError::MikeyParse("truncated SPI/MKI length".into()));
    }
    let mki_len = message[cursor] as usize;
    cursor += 1;
    if mki_len != MKI_LEN {
        return Err(RtspError::MikeyParse(format!("unexpected MKI length {mki_len}")));
    }
    if cursor + MKI_LEN > message.len() {
        return Err(RtspError::MikeyParse("truncated MKI".into()));
    }
    let mut mki = [0u8; MKI_LEN];
    mki.copy_from_slice(&message[cursor..cursor + MKI_LEN]);

    Ok(MikeyKeyMaterial {
        master_key,
        master_salt,
        mki,
        csb_id,
    })
}
