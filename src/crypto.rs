//! Crypto capability traits and the one concrete enctype (spec C5, §6).
//!
//! String-to-key derivation and reply decryption are modeled as narrow
//! traits rather than a closed enum, so a caller can register additional
//! enctypes without this crate knowing about them. [`Aes256CtsHmacSha1`] is
//! the one enctype this crate implements end to end (RFC 3962 / RFC 8009's
//! predecessor), matching what the pack's own reference implementations
//! treat as the default strong enctype.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::KrbError;
use crate::wire::encryption_type;

const AES256_KEY_LEN: usize = 32;
const AES_BLOCK_LEN: usize = 16;
const PBKDF2_ITERATIONS: u32 = 4096;
/// RFC 3961 §5.3 constant used to derive Ke/Ki/Kc from the base key.
const KERBEROS_CONSTANT: &[u8] = b"kerberos";

/// A symmetric key tagged with its enctype, zeroized on drop so a key never
/// outlives its last use in process memory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    #[zeroize(skip)]
    pub etype: i32,
    pub key: Vec<u8>,
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("etype", &self.etype)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// String-to-key derivation: turns a passphrase plus salt into a usable
/// symmetric key for some set of enctypes. Out of scope: anything that
/// reads the passphrase from a terminal or keytab — that's the prompter's
/// job, not this trait's.
pub trait KeyDeriver: Send + Sync {
    /// Derive a key for `etype` from `passphrase` and `salt`. `s2kparams`
    /// carries the optional per-enctype tuning parameters an ETYPE-INFO2
    /// entry may supply (for AES, an iteration count).
    fn string_to_key(
        &self,
        etype: i32,
        passphrase: &[u8],
        salt: &[u8],
        s2kparams: Option<&[u8]>,
    ) -> Result<DerivedKey, KrbError>;

    /// Enctypes this deriver can produce keys for, most preferred first.
    fn supported_etypes(&self) -> &[i32];
}

/// Decrypts an `EncryptedData` blob given a key, verifying integrity before
/// returning plaintext. Out of scope: parsing the plaintext as ASN.1 — the
/// caller (C5/decrypt.rs) does that with the result.
pub trait ReplyDecryptor: Send + Sync {
    fn decrypt(&self, key: &DerivedKey, key_usage: i32, cipher: &[u8]) -> Result<Vec<u8>, KrbError>;

    /// Encrypt `plaintext`, the inverse of [`ReplyDecryptor::decrypt`]. Used
    /// by the PA-ENC-TIMESTAMP pre-auth mechanism to wrap its timestamp.
    fn encrypt(&self, key: &DerivedKey, key_usage: i32, plaintext: &[u8]) -> Result<Vec<u8>, KrbError>;
}

/// The "get-as-key" (gak_fct) capability (spec C10 design notes): fills in
/// `as_key` from a caller-held secret plus `salt`/`s2kparams`/`etype`. Kept
/// separate from [`KeyDeriver`] because the secret itself (a passphrase, a
/// keytab entry, ...) is this capability's private state, not a parameter
/// every caller should have to thread through.
pub trait GetAsKey: Send + Sync {
    fn get_as_key(
        &self,
        salt: &[u8],
        s2kparams: Option<&[u8]>,
        etype: i32,
    ) -> Result<DerivedKey, KrbError>;
}

/// A [`GetAsKey`] backed by a passphrase held in zeroized memory, delegating
/// the actual derivation to a [`KeyDeriver`].
pub struct PassphraseKey<'a> {
    passphrase: zeroize::Zeroizing<Vec<u8>>,
    deriver: &'a dyn KeyDeriver,
}

impl<'a> PassphraseKey<'a> {
    pub fn new(passphrase: impl Into<Vec<u8>>, deriver: &'a dyn KeyDeriver) -> Self {
        PassphraseKey {
            passphrase: zeroize::Zeroizing::new(passphrase.into()),
            deriver,
        }
    }
}

impl GetAsKey for PassphraseKey<'_> {
    fn get_as_key(&self, salt: &[u8], s2kparams: Option<&[u8]>, etype: i32) -> Result<DerivedKey, KrbError> {
        self.deriver.string_to_key(etype, &self.passphrase, salt, s2kparams)
    }
}

type HmacSha1 = Hmac<Sha1>;

/// AES256-CTS-HMAC-SHA1-96 (RFC 3962): PBKDF2-HMAC-SHA1 string-to-key,
/// AES-256-CBC with ciphertext stealing for confidentiality, truncated
/// HMAC-SHA1 for integrity. The one enctype this crate fully implements;
/// everything else is a contract other `KeyDeriver`/`ReplyDecryptor` impls
/// can satisfy.
#[derive(Debug, Default, Clone, Copy)]
pub struct Aes256CtsHmacSha1;

impl Aes256CtsHmacSha1 {
    /// RFC 3961 §5.1 n-fold: expand `input` to `nbytes` by the standard
    /// one's-complement rotate-and-add construction. Works for any input
    /// length; Kerberos only ever folds to 16 bytes (the AES block/key-derive
    /// size used here).
    fn nfold(input: &[u8], nbytes: usize) -> Vec<u8> {
        let inbits = input.len();
        if inbits == 0 || nbytes == 0 {
            return vec![0u8; nbytes];
        }

        let lcm = lcm(nbytes, inbits);
        let mut buf = vec![0u8; nbytes];
        let mut rotated = input.to_vec();
        let mut carry_sum = vec![0u16; nbytes];

        let reps = lcm / inbits;
        let mut msbit = 0usize;
        // Byte-oriented re-implementation of the bit-rotation n-fold: rotate
        // the input by 13 bits each repetition and accumulate with carry.
        for _ in 0..reps {
            for i in 0..nbytes {
                carry_sum[i] = carry_sum[i].wrapping_add(rotated[i % inbits] as u16);
            }
            rotated = rotate_right_13_bits(&rotated, inbits, &mut msbit);
        }

        let mut carry = 0u16;
        for i in (0..nbytes).rev() {
            let total = carry_sum[i] as u32 + carry as u32;
            buf[i] = (total & 0xff) as u8;
            carry = (total >> 8) as u16;
        }
        while carry > 0 {
            for i in (0..nbytes).rev() {
                let total = buf[i] as u32 + carry as u32;
                buf[i] = (total & 0xff) as u8;
                carry = (total >> 8) as u16;
                if carry == 0 {
                    break;
                }
            }
        }
        buf
    }

    /// RFC 3961 §5.3 `DK(base-key, constant)`: derive a usage-specific key
    /// by n-folding `constant`, encrypting it under `base_key` in CBC mode
    /// with a zero IV, and truncating to the key size.
    fn derive_key(base_key: &[u8], constant: &[u8]) -> Result<Vec<u8>, KrbError> {
        let folded = Self::nfold(constant, AES_BLOCK_LEN);
        let key: [u8; AES256_KEY_LEN] = base_key
            .try_into()
            .map_err(|_| KrbError::InvalidEncryptionKey)?;
        let cipher = Aes256::new((&key).into());
        let mut block = [0u8; AES_BLOCK_LEN];
        block.copy_from_slice(&folded);
        cipher.encrypt_block((&mut block).into());
        Ok(block.to_vec())
    }

    fn key_usage_constant(key_usage: i32, which: u8) -> Vec<u8> {
        let mut out = key_usage.to_be_bytes().to_vec();
        out.push(which);
        out
    }

    fn hmac_key(base_key: &[u8], key_usage: i32) -> Result<Vec<u8>, KrbError> {
        Self::derive_key(base_key, &Self::key_usage_constant(key_usage, 0x55))
    }

    fn enc_key(base_key: &[u8], key_usage: i32) -> Result<Vec<u8>, KrbError> {
        Self::derive_key(base_key, &Self::key_usage_constant(key_usage, 0xaa))
    }
}

impl KeyDeriver for Aes256CtsHmacSha1 {
    fn string_to_key(
        &self,
        etype: i32,
        passphrase: &[u8],
        salt: &[u8],
        s2kparams: Option<&[u8]>,
    ) -> Result<DerivedKey, KrbError> {
        if etype != encryption_type::AES256_CTS_HMAC_SHA1_96 {
            return Err(KrbError::UnsupportedEncryption);
        }

        let iterations = match s2kparams {
            Some(bytes) if bytes.len() == 4 => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            Some(_) => return Err(KrbError::PreauthInvalidS2KParams),
            None => PBKDF2_ITERATIONS,
        };

        let mut tmp = [0u8; AES256_KEY_LEN];
        pbkdf2_hmac::<Sha1>(passphrase, salt, iterations, &mut tmp);
        let base_key = Self::derive_key(&tmp, KERBEROS_CONSTANT)?;
        tmp.zeroize();

        Ok(DerivedKey {
            etype,
            key: base_key,
        })
    }

    fn supported_etypes(&self) -> &[i32] {
        &[encryption_type::AES256_CTS_HMAC_SHA1_96]
    }
}

impl ReplyDecryptor for Aes256CtsHmacSha1 {
    fn decrypt(&self, key: &DerivedKey, key_usage: i32, cipher: &[u8]) -> Result<Vec<u8>, KrbError> {
        if key.etype != encryption_type::AES256_CTS_HMAC_SHA1_96 {
            return Err(KrbError::UnsupportedEncryption);
        }
        const HMAC_LEN: usize = 12;
        if cipher.len() < AES_BLOCK_LEN + HMAC_LEN {
            return Err(KrbError::CiphertextInvalid);
        }

        let (body, tag) = cipher.split_at(cipher.len() - HMAC_LEN);

        let ki = Self::hmac_key(&key.key, key_usage)?;
        let mut mac = HmacSha1::new_from_slice(&ki).map_err(|_| KrbError::InvalidEncryptionKey)?;
        mac.update(body);
        let expected = mac.finalize().into_bytes();
        if &expected[..HMAC_LEN] != tag {
            return Err(KrbError::MessageAuthenticationFailed);
        }

        let ke = Self::enc_key(&key.key, key_usage)?;
        let ke: [u8; AES256_KEY_LEN] = ke.try_into().map_err(|_| KrbError::InvalidEncryptionKey)?;
        cts_decrypt(&ke, body)
    }

    fn encrypt(&self, key: &DerivedKey, key_usage: i32, plaintext: &[u8]) -> Result<Vec<u8>, KrbError> {
        if key.etype != encryption_type::AES256_CTS_HMAC_SHA1_96 {
            return Err(KrbError::UnsupportedEncryption);
        }
        if plaintext.is_empty() {
            return Err(KrbError::CiphertextInvalid);
        }

        let ke = Self::enc_key(&key.key, key_usage)?;
        let ke: [u8; AES256_KEY_LEN] = ke.try_into().map_err(|_| KrbError::InvalidEncryptionKey)?;
        let body = cts_encrypt(&ke, plaintext)?;

        let ki = Self::hmac_key(&key.key, key_usage)?;
        let mut mac = HmacSha1::new_from_slice(&ki).map_err(|_| KrbError::InvalidEncryptionKey)?;
        mac.update(&body);
        let tag = mac.finalize().into_bytes();

        let mut out = body;
        out.extend_from_slice(&tag[..12]);
        Ok(out)
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

/// Rotate an n-fold accumulator buffer right by 13 bits, tracking the
/// running bit offset in `msbit` across repeated calls.
fn rotate_right_13_bits(input: &[u8], inbits: usize, msbit: &mut usize) -> Vec<u8> {
    *msbit = (*msbit + 13) % (inbits * 8);
    let total_bits = inbits * 8;
    let mut out = vec![0u8; inbits];
    for bit in 0..total_bits {
        let src_bit = (bit + *msbit) % total_bits;
        let src_byte = src_bit / 8;
        let src_off = 7 - (src_bit % 8);
        let val = (input[src_byte] >> src_off) & 1;
        let dst_byte = bit / 8;
        let dst_off = 7 - (bit % 8);
        out[dst_byte] |= val << dst_off;
    }
    out
}

/// CBC encryption with ciphertext stealing (RFC 3962 §5, the CS3 variant: the
/// final two ciphertext blocks are emitted full-block-first, truncated-block-
/// second, so the total ciphertext is exactly as long as the plaintext with
/// no padding block). Implemented against `Aes256`'s ECB primitive with
/// explicit chaining rather than a stateful CBC type, since CS3 transmits
/// the last two blocks out of chaining order.
fn cts_encrypt(key: &[u8; AES256_KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, KrbError> {
    if plaintext.len() < AES_BLOCK_LEN {
        return Err(KrbError::CiphertextInvalid);
    }
    let cipher = Aes256::new(key.into());

    let tail_len = match plaintext.len() % AES_BLOCK_LEN {
        0 => AES_BLOCK_LEN,
        n => n,
    };
    let head_len = plaintext.len() - tail_len;
    let nfull = head_len / AES_BLOCK_LEN;

    let mut prev = [0u8; AES_BLOCK_LEN];
    let mut out = Vec::with_capacity(plaintext.len() + AES_BLOCK_LEN);
    let mut last_full_cipher = [0u8; AES_BLOCK_LEN];

    for i in 0..nfull {
        let mut block = [0u8; AES_BLOCK_LEN];
        block.copy_from_slice(&plaintext[i * AES_BLOCK_LEN..(i + 1) * AES_BLOCK_LEN]);
        xor_in_place(&mut block, &prev);
        cipher.encrypt_block((&mut block).into());
        prev = block;
        if i + 1 == nfull {
            last_full_cipher = block;
        } else {
            out.extend_from_slice(&block);
        }
    }

    let mut final_block = [0u8; AES_BLOCK_LEN];
    final_block[..tail_len].copy_from_slice(&plaintext[head_len..]);
    xor_in_place(&mut final_block, &prev);
    cipher.encrypt_block((&mut final_block).into());

    if nfull == 0 {
        // Exactly one block of input: nothing to steal from.
        out.extend_from_slice(&final_block);
        return Ok(out);
    }

    out.extend_from_slice(&final_block);
    out.extend_from_slice(&last_full_cipher[..tail_len]);
    Ok(out)
}

/// Inverse of [`cts_encrypt`].
fn cts_decrypt(key: &[u8; AES256_KEY_LEN], cipher_bytes: &[u8]) -> Result<Vec<u8>, KrbError> {
    if cipher_bytes.len() < AES_BLOCK_LEN {
        return Err(KrbError::CiphertextInvalid);
    }
    let cipher = Aes256::new(key.into());

    if cipher_bytes.len() == AES_BLOCK_LEN {
        let mut block = [0u8; AES_BLOCK_LEN];
        block.copy_from_slice(cipher_bytes);
        cipher.decrypt_block((&mut block).into());
        return Ok(block.to_vec());
    }

    let tail_len = match cipher_bytes.len() % AES_BLOCK_LEN {
        0 => AES_BLOCK_LEN,
        n => n,
    };
    let head_len = cipher_bytes.len() - AES_BLOCK_LEN - tail_len;
    let nfull = head_len / AES_BLOCK_LEN;

    let mut prev = [0u8; AES_BLOCK_LEN];
    let mut out = Vec::with_capacity(cipher_bytes.len());
    for i in 0..nfull {
        let mut ct = [0u8; AES_BLOCK_LEN];
        ct.copy_from_slice(&cipher_bytes[i * AES_BLOCK_LEN..(i + 1) * AES_BLOCK_LEN]);
        let mut plain = ct;
        cipher.decrypt_block((&mut plain).into());
        xor_in_place(&mut plain, &prev);
        out.extend_from_slice(&plain);
        prev = ct;
    }

    let c_final = &cipher_bytes[head_len..head_len + AES_BLOCK_LEN];
    let c_stolen = &cipher_bytes[head_len + AES_BLOCK_LEN..];

    let mut dn = [0u8; AES_BLOCK_LEN];
    dn.copy_from_slice(c_final);
    cipher.decrypt_block((&mut dn).into());

    // The bytes of the pre-truncation ciphertext block that weren't
    // transmitted are recoverable because the plaintext was zero-padded
    // there: they equal `dn`'s bytes in the same positions.
    let mut c_prev_full = [0u8; AES_BLOCK_LEN];
    c_prev_full[..tail_len].copy_from_slice(c_stolen);
    c_prev_full[tail_len..].copy_from_slice(&dn[tail_len..]);

    let mut final_plain = dn;
    xor_in_place(&mut final_plain, &c_prev_full);

    let mut prev_plain = c_prev_full;
    cipher.decrypt_block((&mut prev_plain).into());
    xor_in_place(&mut prev_plain, &prev);

    out.extend_from_slice(&prev_plain);
    out.extend_from_slice(&final_plain[..tail_len]);
    Ok(out)
}

fn xor_in_place(block: &mut [u8; AES_BLOCK_LEN], with: &[u8; AES_BLOCK_LEN]) {
    for (b, w) in block.iter_mut().zip(with.iter()) {
        *b ^= w;
    }
}
