pub struct ParseParamError {}

pub enum Param {
    U8(u8),
    U16(u16),
}

impl Param {
    pub fn as_u8(&self) -> Option<u8> {
        let Param::U8(value) = self else {
            return None;
        };
        return Some(*value);
    }

    pub fn as_u16(&self) -> Option<u16> {
        let Param::U16(value) = self else {
            return None;
        };
        return Some(*value);
    }
}

pub struct Spec {
    pub name: String,
    pub required: bool,
    pub parse: fn(&String) -> Result<Param, ParseParamError>,
}

impl Spec {
    pub fn u8(name: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            required: required,
            parse: |src| {
                let trimmed = src.trim();
                let parse_u8 = || {
                    if trimmed.starts_with("0x") {
                        u8::from_str_radix(trimmed.trim_start_matches("0x"), 16)
                    } else {
                        u8::from_str_radix(trimmed, 10)
                    }
                };
                return match parse_u8() {
                    Ok(value) => Ok(Param::U8(value)),
                    Err(_) => Err(ParseParamError {}),
                };
            },
        }
    }

    pub fn u16(name: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            required: required,
            parse: |src| {
                let trimmed = src.trim();
                let parse_u16 = || {
                    if trimmed.starts_with("0x") {
                        u16::from_str_radix(trimmed.trim_start_matches("0x"), 16)
                    } else {
                        u16::from_str_radix(trimmed, 10)
                    }
                };
                return match parse_u16() {
                    Ok(value) => Ok(Param::U16(value)),
                    Err(_) => Err(ParseParamError {}),
                };
            },
        }
    }
}
