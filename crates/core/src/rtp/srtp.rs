//! SRTP/SRTCP crypto context: AES-CM-128 keystream, 80-bit
//! HMAC-SHA1 authentication tag, and rollover-counter tracking, per RFC
//! 3711. Key derivation follows Appendix B.3's PRF labels.

use aes::Aes128;
use aes::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{Result, RtspError};

type Aes128Ctr = Ctr128BE<Aes128>;
type HmacSha1 = Hmac<Sha1>;

pub const MASTER_KEY_LEN: usize = 16;
pub const MASTER_SALT_LEN: usize = 14;
pub const AUTH_TAG_LEN: usize = 10;
pub const MKI_LEN: usize = 4;

/// PRF derivation labels, RFC 3711 Appendix B.3.
mod label {
    pub const RTP_ENCRYPTION: u8 = 0x00;
    pub const RTP_AUTH: u8 = 0x01;
    pub const RTP_SALT: u8 = 0x02;
    pub const RTCP_ENCRYPTION: u8 = 0x03;
    pub const RTCP_AUTH: u8 = 0x04;
    pub const RTCP_SALT: u8 = 0x05;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DerivedKeys {
    session_key: [u8; MASTER_KEY_LEN],
    session_salt: [u8; MASTER_SALT_LEN],
    auth_key: [u8; 20],
}

fn derive(master_key: &[u8; MASTER_KEY_LEN], master_salt: &[u8; MASTER_SALT_LEN], label: u8) -> [u8; 16] {
    // x = (key_derivation_rate == 0) ? index : index DIV key_derivation_rate;
    // here key_derivation_rate is always 0, so x = 0 and the label is the
    // only variable component of the IV (RFC 3711 §4.3.1).
    let mut iv = [0u8; 16];
    iv[..MASTER_SALT_LEN].copy_from_slice(master_salt);
    iv[7] ^= label;

    let mut cipher = Aes128Ctr::new(master_key.into(), (&iv).into());
    let mut out = [0u8; 16];
    cipher.apply_keystream(&mut out);
    out
}

fn derive_keys(master_key: &[u8; MASTER_KEY_LEN], master_salt: &[u8; MASTER_SALT_LEN], rtcp: bool) -> DerivedKeys {
    let (enc_label, auth_label, salt_label) = if rtcp {
        (label::RTCP_ENCRYPTION, label::RTCP_AUTH, label::RTCP_SALT)
    } else {
        (label::RTP_ENCRYPTION, label::RTP_AUTH, label::RTP_SALT)
    };

    let session_key = derive(master_key, master_salt, enc_label);
    let salt_block = derive(master_key, master_salt, salt_label);
    let mut session_salt = [0u8; MASTER_SALT_LEN];
    session_salt.copy_from_slice(&salt_block[..MASTER_SALT_LEN]);

    // Auth key is 160 bits: two PRF blocks concatenated with successive
    // IV increments (RFC 3711 §4.3.2 generalizes the block count by key
    // length; for HMAC-SHA1's 20-byte key this is ceil(20/16) = 2 blocks).
    let auth_block0 = derive(master_key, master_salt, auth_label);
    let mut iv2 = [0u8; 16];
    iv2[..MASTER_SALT_LEN].copy_from_slice(master_salt);
    iv2[7] ^= auth_label;
    let mut counter = u128::from_be_bytes(iv2);
    counter = counter.wrapping_add(1);
    let iv2 = counter.to_be_bytes();
    let mut cipher = Aes128Ctr::new(master_key.into(), (&iv2).into());
    let mut auth_block1 = [0u8; 16];
    cipher.apply_keystream(&mut auth_block1);

    let mut auth_key = [0u8; 20];
    auth_key[..16].copy_from_slice(&auth_block0);
    auth_key[16..20].copy_from_slice(&auth_block1[..4]);

    DerivedKeys {
        session_key,
        session_salt,
        auth_key,
    }
}

/// Rollover/out-of-order threshold, RFC 3711 §3.3.1's `seq - prev_high`
/// bound for treating a jump as a wrap rather than reordering.
const ROC_WRAP_THRESHOLD: u32 = 0x1000;

/// The ROC this packet's sequence number implies, plus whether it becomes
/// the new high-water mark, computed without touching [`RolloverState`].
/// Callers commit the decision only once the packet has authenticated, so
/// a forged or corrupted packet can never advance the rollover state.
#[derive(Debug, Clone, Copy)]
struct RolloverDecision {
    roc: u32,
    new_high: Option<u16>,
}

/// Per-SSRC rollover state: tracks the highest sequence number seen and
/// counts wraps, needed both for keystream IV construction and for
/// wrap-aware ordering.
#[derive(Debug, Clone, Copy, Default)]
struct RolloverState {
    roc: u32,
    highest_seq: Option<u16>,
}

impl RolloverState {
    /// Decide this sequence number's ROC using the four cases of RFC 3711
    /// §3.3.1: normal in-order delivery, an out-of-order packet that
    /// crosses a rollover the receiver already committed (ROC - 1), a
    /// genuine rollover (ROC + 1), and out-of-order delivery within the
    /// current cycle (unchanged).
    fn decide(&self, seq: u16) -> RolloverDecision {
        let Some(prev_high) = self.highest_seq else {
            return RolloverDecision {
                roc: self.roc,
                new_high: Some(seq),
            };
        };

        if seq >= prev_high {
            if (seq as u32 - prev_high as u32) < ROC_WRAP_THRESHOLD {
                RolloverDecision {
                    roc: self.roc,
                    new_high: Some(seq),
                }
            } else {
                RolloverDecision {
                    roc: self.roc.wrapping_sub(1),
                    new_high: None,
                }
            }
        } else if (prev_high as u32 - seq as u32) > ROC_WRAP_THRESHOLD {
            RolloverDecision {
                roc: self.roc.wrapping_add(1),
                new_high: Some(seq),
            }
        } else {
            RolloverDecision {
                roc: self.roc,
                new_high: None,
            }
        }
    }

    /// Apply a previously computed decision, advancing `roc` and the
    /// high-water mark.
    fn commit(&mut self, decision: RolloverDecision) {
        self.roc = decision.roc;
        if let Some(seq) = decision.new_high {
            self.highest_seq = Some(seq);
        }
    }

    /// Decide and immediately commit, for the sending side where there is
    /// no authentication step to gate on.
    fn advance(&mut self, seq: u16) -> u32 {
        let decision = self.decide(seq);
        let roc = decision.roc;
        self.commit(decision);
        roc
    }
}

/// One direction's crypto state for one SSRC: derived session keys plus
/// rollover tracking. Separate contexts are kept per-SSRC at the session
/// layer (the session layer owns the map).
pub struct SrtpCryptoContext {
    rtp_keys: DerivedKeys,
    rtcp_keys: DerivedKeys,
    rollover: RolloverState,
    rtcp_index: u32,
}

impl SrtpCryptoContext {
    pub fn new(master_key: [u8; MASTER_KEY_LEN], master_salt: [u8; MASTER_SALT_LEN]) -> Self {
        Self {
            rtp_keys: derive_keys(&master_key, &master_salt, false),
            rtcp_keys: derive_keys(&master_key, &master_salt, true),
            rollover: RolloverState::default(),
            rtcp_index: 0,
        }
    }

    fn rtp_iv(&self, ssrc: u32, seq: u16, roc: u32) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[4..8].copy_from_slice(&ssrc.to_be_bytes());
        let index = ((roc as u64) << 16) | seq as u64;
        iv[6..14].copy_from_slice(&(index << 16).to_be_bytes()[..8]);
        for i in 0..14 {
            iv[i] ^= self.rtp_keys.session_salt[i];
        }
        iv
    }

    /// Decrypt and authenticate an inbound SRTP packet in place, returning
    /// the plaintext RTP packet. `packet` must include the trailing
    /// authentication tag (and MKI if `with_mki` is set).
    pub fn process_incoming_srtp(&mut self, packet: &[u8], with_mki: bool) -> Result<Vec<u8>> {
        let mki_len = if with_mki { MKI_LEN } else { 0 };
        if packet.len() < crate::rtp::header::HEADER_LEN + AUTH_TAG_LEN + mki_len {
            return Err(RtspError::SrtpPacketTooShort);
        }

        let tag_start = packet.len() - AUTH_TAG_LEN;
        let auth_portion_end = tag_start - mki_len;
        let tag = &packet[tag_start..];
        let authenticated = &packet[..auth_portion_end];

        let parsed = crate::rtp::header::parse(&packet[..auth_portion_end])
            .ok_or(RtspError::SrtpPacketTooShort)?;
        let seq = parsed.sequence;
        let ssrc = parsed.ssrc;
        let decision = self.rollover.decide(seq);
        let roc = decision.roc;

        let mut mac = HmacSha1::new_from_slice(&self.rtp_keys.auth_key)
            .map_err(|_| RtspError::SrtpAuthFailed)?;
        mac.update(authenticated);
        mac.update(&roc.to_be_bytes());
        let full_tag = mac.finalize().into_bytes();
        if &full_tag[..AUTH_TAG_LEN] != tag {
            // Authentication failed: leave the rollover state untouched so a
            // forged or corrupted packet can't corrupt future decryption.
            return Err(RtspError::SrtpAuthFailed);
        }
        self.rollover.commit(decision);

        let header_len = crate::rtp::header::HEADER_LEN;
        let mut plaintext = authenticated.to_vec();
        let iv = self.rtp_iv(ssrc, seq, roc);
        let mut cipher = Aes128Ctr::new((&self.rtp_keys.session_key).into(), (&iv).into());
        cipher.apply_keystream(&mut plaintext[header_len..]);

        Ok(plaintext)
    }

    /// Encrypt and append an authentication tag to an outbound plaintext
    /// RTP packet.
    pub fn process_outgoing_srtp(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        let parsed = crate::rtp::header::parse(packet).ok_or(RtspError::SrtpPacketTooShort)?;
        let seq = parsed.sequence;
        let ssrc = parsed.ssrc;
        let roc = self.rollover.advance(seq);

        let header_len = crate::rtp::header::HEADER_LEN;
        let mut out = packet.to_vec();
        let iv = self.rtp_iv(ssrc, seq, roc);
        let mut cipher = Aes128Ctr::new((&self.rtp_keys.session_key).into(), (&iv).into());
        cipher.apply_keystream(&mut out[header_len..]);

        let mut mac = HmacSha1::new_from_slice(&self.rtp_keys.auth_key)
            .map_err(|_| RtspError::SrtpAuthFailed)?;
        mac.update(&out);
        mac.update(&roc.to_be_bytes());
        let tag = mac.finalize().into_bytes();
        out.extend_from_slice(&tag[..AUTH_TAG_LEN]);

        Ok(out)
    }

    /// Encrypt and authenticate an outbound SRTCP compound packet,
    /// appending the E-bit/index word and auth tag (RFC 3711 §3.4).
    pub fn process_outgoing_srtcp(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        if packet.len() < 8 {
            return Err(RtspError::SrtpPacketTooShort);
        }
        let index = self.rtcp_index;
        self.rtcp_index = self.rtcp_index.wrapping_add(1);

        let ssrc = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        let mut out = packet[..4].to_vec();
        out.extend_from_slice(&packet[4..8]);

        let mut body = packet[8..].to_vec();
        let mut iv = [0u8; 16];
        iv[4..8].copy_from_slice(&ssrc.to_be_bytes());
        iv[6..10].copy_from_slice(&(index | 0x8000_0000).to_be_bytes());
        for i in 0..14 {
            iv[i] ^= self.rtcp_keys.session_salt[i];
        }
        let mut cipher = Aes128Ctr::new((&self.rtcp_keys.session_key).into(), (&iv).into());
        cipher.apply_keystream(&mut body);
        out.extend_from_slice(&body);

        let e_and_index = index | 0x8000_0000;
        out.extend_from_slice(&e_and_index.to_be_bytes());

        let mut mac = HmacSha1::new_from_slice(&self.rtcp_keys.auth_key)
            .map_err(|_| RtspError::SrtpAuthFailed)?;
        mac.update(&out);
        let tag = mac.finalize().into_bytes();
        out.extend_from_slice(&tag[..AUTH_TAG_LEN]);

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys() -> ([u8; MASTER_KEY_LEN], [u8; MASTER_SALT_LEN]) {
        let key = [0x11u8; MASTER_KEY_LEN];
        let salt = [0x22u8; MASTER_SALT_LEN];
        (key, salt)
    }

    #[test]
    fn rtp_encrypt_decrypt_roundtrip() {
        let (key, salt) = test_keys();
        let mut sender = SrtpCryptoContext::new(key, salt);
        let mut receiver = SrtpCryptoContext::new(key, salt);

        let mut header = crate::rtp::header::RtpHeader::with_base(96, 0x1234_5678, 0, 0);
        let mut packet = header.write(false).to_vec();
        packet.extend_from_slice(b"hello world");

        let encrypted = sender.process_outgoing_srtp(&packet).unwrap();
        let decrypted = receiver.process_incoming_srtp(&encrypted, false).unwrap();
        assert_eq!(decrypted, packet);
    }

    #[test]
    fn tampered_auth_tag_is_rejected() {
        let (key, salt) = test_keys();
        let mut sender = SrtpCryptoContext::new(key, salt);
        let mut receiver = SrtpCryptoContext::new(key, salt);

        let mut header = crate::rtp::header::RtpHeader::with_base(96, 0xAABBCCDD, 0, 0);
        let mut packet = header.write(false).to_vec();
        packet.extend_from_slice(b"payload");

        let mut encrypted = sender.process_outgoing_srtp(&packet).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xFF;

        assert!(matches!(
            receiver.process_incoming_srtp(&encrypted, false),
            Err(RtspError::SrtpAuthFailed)
        ));
    }

    #[test]
    fn failed_auth_leaves_rollover_state_uncommitted() {
        let (key, salt) = test_keys();
        let mut sender = SrtpCryptoContext::new(key, salt);
        let mut receiver = SrtpCryptoContext::new(key, salt);

        let mut header = crate::rtp::header::RtpHeader::with_base(96, 0xAABBCCDD, 0xFFFE, 0);
        let mut packet = header.write(false).to_vec();
        packet.extend_from_slice(b"payload");
        let mut encrypted = sender.process_outgoing_srtp(&packet).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xFF;

        assert!(receiver.process_incoming_srtp(&encrypted, false).is_err());
        assert_eq!(receiver.rollover.roc, 0);
        assert_eq!(receiver.rollover.highest_seq, None);
    }

    #[test]
    fn srtp_authenticates_across_sequence_wrap() {
        let (key, salt) = test_keys();
        let mut sender = SrtpCryptoContext::new(key, salt);
        let mut receiver = SrtpCryptoContext::new(key, salt);

        let mut header = crate::rtp::header::RtpHeader::with_base(96, 0xAABBCCDD, 0xFFFE, 0);
        for seq in [0xFFFEu16, 0xFFFF, 0x0000, 0x0001] {
            let mut packet = header.write(false).to_vec();
            packet.extend_from_slice(b"frame");
            let actual_seq = u16::from_be_bytes([packet[2], packet[3]]);
            assert_eq!(actual_seq, seq);

            let encrypted = sender.process_outgoing_srtp(&packet).unwrap();
            let decrypted = receiver.process_incoming_srtp(&encrypted, false).unwrap();
            assert_eq!(decrypted, packet);
        }

        assert_eq!(receiver.rollover.roc, 1);
        assert_eq!(sender.rollover.roc, 1);
    }

    #[test]
    fn rollover_increments_after_wrap() {
        let mut rollover = RolloverState::default();
        assert_eq!(rollover.advance(65530), 0);
        assert_eq!(rollover.advance(65535), 0);
        assert_eq!(rollover.advance(3), 1, "sequence wrapped past 0");
    }

    #[test]
    fn rollover_tolerates_reorder_near_wrap() {
        let mut rollover = RolloverState::default();
        rollover.advance(65530);
        rollover.advance(3); // wraps to roc=1
        let roc = rollover.advance(65533); // late arrival from before the wrap
        assert_eq!(roc, 0, "late pre-wrap packet must resolve to the prior ROC");
    }

    #[test]
    fn short_packet_is_rejected() {
        let (key, salt) = test_keys();
        let mut ctx = SrtpCryptoContext::new(key, salt);
        assert!(matches!(
            ctx.process_incoming_srtp(&[0u8; 4], false),
            Err(RtspError::SrtpPacketTooShort)
        ));
    }
}
