/// Dash positions of the canonical 8-4-4-4-12 UUID form.
const DASH_POSITIONS: [usize; 4] = [8, 13, 18, 23];

fn is_hex(byte: u8) -> bool {
    byte.is_ascii_hexdigit()
}

fn is_plain_uuid(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(is_hex)
}

fn is_dashed_uuid(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    s.bytes().enumerate().all(|(index, byte)| {
        if DASH_POSITIONS.contains(&index) {
            byte == b'-'
        } else {
            is_hex(byte)
        }
    })
}

/// Normalizes an id to the lowercase dashed UUID form. Accepts exactly the
/// 32-hex and dashed 8-4-4-4-12 spellings; anything else is rejected.
pub fn normalize_uuid(input: &str) -> Option<String> {
    let lowered = input.to_ascii_lowercase();
    if is_dashed_uuid(&lowered) {
        return Some(lowered);
    }
    if is_plain_uuid(&lowered) {
        let mut dashed = String::with_capacity(36);
        for (index, ch) in lowered.chars().enumerate() {
            if [8, 12, 16, 20].contains(&index) {
                dashed.push('-');
            }
            dashed.push(ch);
        }
        return Some(dashed);
    }
    None
}

/// Finds the first UUID-looking token (dashed or 32-hex) inside `input` and
/// returns it; when none is present the input comes back unchanged.
pub fn extract_uuid_like(input: &str) -> String {
    for start in 0..input.len() {
        if let Some(window) = input.get(start..start + 36) {
            if is_dashed_uuid(window) {
                return window.to_string();
            }
        }
        if let Some(window) = input.get(start..start + 32) {
            if is_plain_uuid(window) {
                return window.to_string();
            }
        }
    }
    input.to_string()
}
