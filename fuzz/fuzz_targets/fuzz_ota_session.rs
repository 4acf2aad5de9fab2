//! Fuzz target: `OtaSession`
//!
//! Interprets the input as a script of begin/chunk/complete/abort calls.
//! The session must never panic, staging must be open exactly while a
//! session is active, and an image is only committed when its digest
//! matches the bytes actually staged.
//!
//! cargo fuzz run fuzz_ota_session

#![no_main]

use crema::adapters::firmware::MemoryFirmware;
use crema::rpc::ota::OtaSession;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut ota = OtaSession::new();
    let mut fw = MemoryFirmware::new();
    let mut staged: Vec<u8> = Vec::new();
    let mut now = 0u64;
    let mut input = data;

    while let Some((&op, rest)) = input.split_first() {
        input = rest;
        now += 10;
        match op % 4 {
            0 => {
                let size = u32::from(op) * 8 + 1;
                if ota.begin(size, &mut fw, now).is_ok() {
                    staged.clear();
                }
            }
            1 => {
                let len = usize::from(op >> 2).min(input.len());
                let (chunk, rest) = input.split_at(len);
                input = rest;
                let seq = u16::from(op >> 5);
                let offset = staged.len() as u32;
                if let Ok(p) = ota.chunk(seq, offset, chunk, &mut fw, now) {
                    let received = p.bytes_received as usize;
                    if received == staged.len() + chunk.len() {
                        staged.extend_from_slice(chunk);
                    } else {
                        // Retransmission: acknowledged without a write.
                        assert_eq!(received, staged.len());
                    }
                }
            }
            2 => {
                let digest = if op & 0x80 == 0 {
                    hmac_sha256::Hash::hash(&staged)
                } else {
                    [op; 32]
                };
                if ota.complete(&digest, &mut fw).is_ok() {
                    assert_eq!(fw.committed(), Some(&staged[..]));
                    return;
                }
            }
            _ => {
                let _ = ota.abort(&mut fw);
            }
        }
        assert_eq!(ota.is_active(), fw.is_staging());
    }
});
