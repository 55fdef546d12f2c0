//! Canonical wire encoding of transactions
//!
//! Legacy (non-witness) layout:
//! `version:i32le | n_in:CompactSize | inputs | n_out:CompactSize | outputs | lock_time:u32le`
//! with each input as `prev_txid:32 | vout:u32le | script_sig:var | sequence:u32le`
//! and each output as `value:u64le | script_pubkey:var`.

use bytes::{Buf, BufMut, BytesMut};

use super::script::Script;
use super::transaction::{OutPoint, Transaction, TransactionError, TxIn, TxOut, Txid};

/// Serialize a transaction
pub fn serialize(tx: &Transaction) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(10 + tx.inputs.len() * 150 + tx.outputs.len() * 34);
    encode_transaction(tx, &mut buf);
    buf.to_vec()
}

/// Deserialize a transaction, rejecting truncated input and trailing bytes
pub fn deserialize(data: &[u8]) -> Result<Transaction, TransactionError> {
    let mut buf = data;
    let tx = decode_transaction(&mut buf)?;
    if buf.has_remaining() {
        return Err(TransactionError::Decode(format!(
            "{} trailing bytes",
            buf.remaining()
        )));
    }
    Ok(tx)
}

pub fn encode_transaction(tx: &Transaction, buf: &mut BytesMut) {
    buf.put_i32_le(tx.version);

    write_compact_size(buf, tx.inputs.len() as u64);
    for input in &tx.inputs {
        buf.put_slice(input.previous_output.txid.as_bytes());
        buf.put_u32_le(input.previous_output.vout);
        write_script(buf, &input.script_sig);
        buf.put_u32_le(input.sequence);
    }

    write_compact_size(buf, tx.outputs.len() as u64);
    for output in &tx.outputs {
        buf.put_u64_le(output.value);
        write_script(buf, &output.script_pubkey);
    }

    buf.put_u32_le(tx.lock_time);
}

pub fn decode_transaction(buf: &mut &[u8]) -> Result<Transaction, TransactionError> {
    ensure(buf, 4, "version")?;
    let version = buf.get_i32_le();

    let n_in = read_count(buf, 41, "input count")?;
    let mut inputs = Vec::with_capacity(n_in);
    for _ in 0..n_in {
        ensure(buf, 36, "outpoint")?;
        let mut txid = [0u8; 32];
        buf.copy_to_slice(&mut txid);
        let vout = buf.get_u32_le();
        let script_sig = read_script(buf)?;
        ensure(buf, 4, "sequence")?;
        let sequence = buf.get_u32_le();
        inputs.push(TxIn {
            previous_output: OutPoint::new(Txid::from_bytes(txid), vout),
            script_sig,
            sequence,
        });
    }

    let n_out = read_count(buf, 9, "output count")?;
    let mut outputs = Vec::with_capacity(n_out);
    for _ in 0..n_out {
        ensure(buf, 8, "value")?;
        let value = buf.get_u64_le();
        let script_pubkey = read_script(buf)?;
        outputs.push(TxOut {
            value,
            script_pubkey,
        });
    }

    ensure(buf, 4, "lock time")?;
    let lock_time = buf.get_u32_le();

    Ok(Transaction {
        version,
        inputs,
        outputs,
        lock_time,
    })
}

// =============================================================================
// CompactSize
// =============================================================================

pub fn write_compact_size(buf: &mut BytesMut, n: u64) {
    match n {
        0..=0xfc => buf.put_u8(n as u8),
        0xfd..=0xffff => {
            buf.put_u8(0xfd);
            buf.put_u16_le(n as u16);
        }
        0x1_0000..=0xffff_ffff => {
            buf.put_u8(0xfe);
            buf.put_u32_le(n as u32);
        }
        _ => {
            buf.put_u8(0xff);
            buf.put_u64_le(n);
        }
    }
}

/// Read a CompactSize, rejecting non-minimal encodings
pub fn read_compact_size(buf: &mut &[u8]) -> Result<u64, TransactionError> {
    ensure(buf, 1, "length prefix")?;
    let (value, min) = match buf.get_u8() {
        0xfd => {
            ensure(buf, 2, "length prefix")?;
            (buf.get_u16_le() as u64, 0xfd)
        }
        0xfe => {
            ensure(buf, 4, "length prefix")?;
            (buf.get_u32_le() as u64, 0x1_0000)
        }
        0xff => {
            ensure(buf, 8, "length prefix")?;
            (buf.get_u64_le(), 0x1_0000_0000)
        }
        small => return Ok(small as u64),
    };
    if value < min {
        return Err(TransactionError::Decode(format!(
            "non-canonical length prefix for {}",
            value
        )));
    }
    Ok(value)
}

fn write_script(buf: &mut BytesMut, script: &Script) {
    write_compact_size(buf, script.len() as u64);
    buf.put_slice(script.as_bytes());
}

fn read_script(buf: &mut &[u8]) -> Result<Script, TransactionError> {
    let len = read_compact_size(buf)? as usize;
    ensure(buf, len, "script")?;
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(Script::from_bytes(bytes))
}

/// Element count, bounded by what the remaining bytes could possibly hold
fn read_count(buf: &mut &[u8], min_item_size: usize, what: &str) -> Result<usize, TransactionError> {
    let n = read_compact_size(buf)?;
    if n > (buf.remaining() / min_item_size) as u64 {
        return Err(TransactionError::Decode(format!(
            "{} {} exceeds remaining data",
            what, n
        )));
    }
    Ok(n as usize)
}

fn ensure(buf: &&[u8], n: usize, what: &str) -> Result<(), TransactionError> {
    if buf.remaining() < n {
        Err(TransactionError::Decode(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            n,
            buf.remaining()
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Network, Script, SEQUENCE_FINAL};
    use crate::crypto::KeyPair;

    fn sample_tx() -> Transaction {
        let addr = KeyPair::generate(Network::Testnet).address();
        Transaction {
            version: 1,
            inputs: vec![
                TxIn::new(OutPoint::new(Txid::from_bytes([3u8; 32]), 1)),
                TxIn {
                    previous_output: OutPoint::new(Txid::from_bytes([4u8; 32]), 0),
                    script_sig: Script::from_bytes(vec![0x51; 300]),
                    sequence: 0xfffffffe,
                },
            ],
            outputs: vec![
                TxOut {
                    value: 1_000,
                    script_pubkey: addr.script_pubkey(),
                },
                TxOut {
                    value: 99_000,
                    script_pubkey: Script::new(),
                },
            ],
            lock_time: 500_000,
        }
    }

    #[test]
    fn test_compact_size_boundaries() {
        for (n, len) in [
            (0u64, 1usize),
            (0xfc, 1),
            (0xfd, 3),
            (0xffff, 3),
            (0x1_0000, 5),
            (0xffff_ffff, 5),
            (0x1_0000_0000, 9),
        ] {
            let mut buf = BytesMut::new();
            write_compact_size(&mut buf, n);
            assert_eq!(buf.len(), len);
            let mut slice = &buf[..];
            assert_eq!(read_compact_size(&mut slice).unwrap(), n);
        }
    }

    #[test]
    fn test_non_canonical_compact_size_rejected() {
        let mut slice: &[u8] = &[0xfd, 0x10, 0x00];
        assert!(read_compact_size(&mut slice).is_err());
    }

    #[test]
    fn test_round_trip() {
        let tx = sample_tx();
        let bytes = serialize(&tx);
        assert_eq!(deserialize(&bytes).unwrap(), tx);
    }

    #[test]
    fn test_layout() {
        let tx = sample_tx();
        let bytes = serialize(&tx);
        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
        assert_eq!(bytes[4], 2);
        assert_eq!(&bytes[5..37], &[3u8; 32]);
        assert_eq!(&bytes[37..41], &[1, 0, 0, 0]);
        assert_eq!(bytes[41], 0);
        assert_eq!(&bytes[42..46], &SEQUENCE_FINAL.to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 4..], &500_000u32.to_le_bytes());
    }

    #[test]
    fn test_truncated_and_trailing_rejected() {
        let bytes = serialize(&sample_tx());
        for cut in [0, 3, 10, 45, bytes.len() - 1] {
            assert!(deserialize(&bytes[..cut]).is_err(), "cut at {}", cut);
        }

        let mut extra = bytes.clone();
        extra.push(0);
        assert!(matches!(
            deserialize(&extra),
            Err(TransactionError::Decode(_))
        ));
    }

    #[test]
    fn test_absurd_counts_rejected() {
        // version, then an input count far larger than the payload
        let bytes = [1u8, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff, 0x0f];
        assert!(deserialize(&bytes).is_err());
    }
}
