#![no_main]
use libfuzzer_sys::fuzz_target;

use std::collections::HashMap;

use gles_retrace::HandleMap;

// Each five-byte chunk is an operation: a tag, then a little-endian key.
// Keys are spread so that both the dense and the sparse storage get used.
fuzz_target!(|data: &[u8]| {
    let mut map: HandleMap<u32> = HandleMap::with_sentinel(0);
    let mut model: HashMap<u32, u32> = HashMap::new();

    for (step, op) in data.chunks_exact(5).enumerate() {
        let raw = u32::from_le_bytes([op[1], op[2], op[3], op[4]]);
        let key = if op[0] & 0x80 != 0 { raw } else { raw % 256 };
        let value = step as u32 + 1;
        match op[0] % 3 {
            0 => {
                map.set(key, value);
                model.insert(key, value);
            }
            1 => {
                let expected = model.remove(&key).unwrap_or(0);
                assert_eq!(map.forget(key), expected);
            }
            _ => {
                let expected = model.get(&key).copied().unwrap_or(0);
                assert_eq!(map.get(key), expected);
                assert_eq!(map.is_live(key), expected != 0);
            }
        }
    }

    let mut live = map.live_entries();
    live.sort_unstable();
    let mut expected: Vec<_> = model.into_iter().collect();
    expected.sort_unstable();
    assert_eq!(live, expected);
});
