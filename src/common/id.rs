//! Kademlia keys and the XOR distance between them.
use rand::Rng;
use sha1_smol::Sha1;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of keys in bytes.
pub const KEY_SIZE: usize = 20;
/// The size of keys in bits.
pub const KEY_BITS: usize = KEY_SIZE * 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// A 160-bit identifier for peers and chunks.
pub struct Key(pub [u8; KEY_SIZE]);

impl Key {
    /// Uniformly random key, used for node identities and bootstrap placeholders.
    pub fn random() -> Key {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; KEY_SIZE] = rng.gen();

        Key(random_bytes)
    }

    /// Content address of `data`: the SHA-1 digest of the bytes.
    pub fn from_data(data: &[u8]) -> Key {
        let mut hasher = Sha1::new();
        hasher.update(data);

        Key(hasher.digest().bytes())
    }

    /// Name address: the SHA-1 digest of the UTF-8 name.
    pub fn from_name(name: &str) -> Key {
        Key::from_data(name.as_bytes())
    }

    /// Create a new Key from some bytes. Returns Err if `bytes` is not of length
    /// [KEY_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Key> {
        let bytes = bytes.as_ref();
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKeySize(bytes.len()));
        }

        let mut tmp: [u8; KEY_SIZE] = [0; KEY_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Key(tmp))
    }

    /// XOR distance between this key and `other`.
    pub fn distance(&self, other: &Key) -> Dist {
        let mut xor = [0_u8; KEY_SIZE];

        for (i, byte) in xor.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Dist(xor)
    }

    /// Bit at `index`, where index 0 is the most significant bit.
    pub fn bit(&self, index: usize) -> bool {
        debug_assert!(index < KEY_BITS);

        (self.0[index / 8] >> (7 - (index % 8))) & 1 == 1
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// First six hex digits, enough to tell keys apart in logs.
    pub fn short(&self) -> String {
        self.to_string()[..6].to_string()
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Key> {
        if s.len() != KEY_SIZE * 2 || !s.is_ascii() {
            return Err(Error::InvalidKeyEncoding(s.to_string()));
        }

        let mut bytes = [0_u8; KEY_SIZE];

        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidKeyEncoding(s.to_string()))?;
        }

        Ok(Key(bytes))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// XOR distance between two keys.
///
/// Ordered as a big-endian unsigned integer, which is exactly the lexicographic
/// order of the bytes.
pub struct Dist(pub [u8; KEY_SIZE]);

impl Dist {
    /// Distance of a key to itself.
    pub const ZERO: Dist = Dist([0; KEY_SIZE]);
}

impl Debug for Dist {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Dist({})", Key(self.0))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        let key = Key::random();

        assert_eq!(key.distance(&key), Dist::ZERO);
    }

    #[test]
    fn distance_is_symmetric() {
        for _ in 0..100 {
            let a = Key::random();
            let b = Key::random();

            assert_eq!(a.distance(&b), b.distance(&a));
            assert!(a.distance(&a) <= a.distance(&b));
        }
    }

    #[test]
    fn distance_ordering_is_big_endian() {
        let target = Key([0; KEY_SIZE]);

        let mut high = [0; KEY_SIZE];
        high[0] = 0b0000_0001;
        let mut low = [0; KEY_SIZE];
        low[KEY_SIZE - 1] = 0xff;

        assert!(target.distance(&Key(low)) < target.distance(&Key(high)));
    }

    #[test]
    fn bits_are_most_significant_first() {
        let mut bytes = [0; KEY_SIZE];
        bytes[0] = 0b1000_0000;
        bytes[1] = 0b0000_0001;
        let key = Key(bytes);

        assert!(key.bit(0));
        assert!(!key.bit(1));
        assert!(key.bit(15));
        assert!(!key.bit(KEY_BITS - 1));
    }

    #[test]
    fn from_data_is_sha1() {
        let key = Key::from_data(b"hello world");

        assert_eq!(
            key.to_string(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
        assert_eq!(Key::from_name("hello world"), key);
    }

    #[test]
    fn hex_roundtrip() {
        let key = Key::random();
        let parsed: Key = key.to_string().parse().unwrap();

        assert_eq!(parsed, key);
        assert_eq!(key.short().len(), 6);
        assert!("zz".parse::<Key>().is_err());
    }

    #[test]
    fn from_bytes_rejects_wrong_size() {
        assert!(Key::from_bytes([0_u8; 19]).is_err());
        assert!(Key::from_bytes([0_u8; 21]).is_err());
        assert!(Key::from_bytes([0_u8; 20]).is_ok());
    }
}
