#![no_main]
use libfuzzer_sys::fuzz_target;

use gles_retrace::CallSet;

fuzz_target!(|data: &[u8]| {
    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(_) => return,
    };
    if let Ok(set) = CallSet::parse(text) {
        for call_no in 0..64 {
            set.contains(call_no, "glDrawArrays");
            set.contains(call_no, "eglSwapBuffers");
        }
        set.contains(u32::MAX, "glBindFramebuffer");
    }
});
