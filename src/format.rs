// Positional message formatting
//
// The format language is deliberately tiny: `%v` consumes the next
// argument, `%%` emits a literal percent sign, and everything else is
// copied through verbatim. Formatting problems (a `%v` with no argument
// left) fold into the output line rather than failing the log call.

use std::fmt::Display;

/// A single formatting argument, carried as a tagged variant so the hot
/// path never needs dynamic dispatch for the common primitive types.
#[derive(Debug, Clone)]
pub enum FmtArg<'a> {
    Bool(bool),
    Char(char),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(&'a str),
    Owned(String),
}

impl<'a> FmtArg<'a> {
    /// Stringify any `Display` type into an argument. This is the hook
    /// for user-defined types; the conversion runs before submission, so
    /// a slow `Display` impl costs the caller, not the writer.
    pub fn display<T: Display>(value: &T) -> FmtArg<'static> {
        FmtArg::Owned(value.to_string())
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            FmtArg::Bool(v) => out.extend_from_slice(if *v { b"true" } else { b"false" }),
            FmtArg::Char(v) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(v.encode_utf8(&mut buf).as_bytes());
            }
            FmtArg::I64(v) => {
                let mut buf = itoa_buf();
                out.extend_from_slice(write_decimal(&mut buf, *v));
            }
            FmtArg::U64(v) => {
                let mut buf = itoa_buf();
                out.extend_from_slice(write_decimal_u(&mut buf, *v));
            }
            FmtArg::F64(v) => {
                use std::io::Write;
                let _ = write!(out, "{}", v);
            }
            FmtArg::Str(v) => out.extend_from_slice(v.as_bytes()),
            FmtArg::Owned(v) => out.extend_from_slice(v.as_bytes()),
        }
    }
}

macro_rules! fmtarg_from_int {
    ($variant:ident, $wide:ty, $($ty:ty),+) => {
        $(impl<'a> From<$ty> for FmtArg<'a> {
            fn from(v: $ty) -> Self {
                FmtArg::$variant(v as $wide)
            }
        })+
    };
}

fmtarg_from_int!(I64, i64, i8, i16, i32, i64, isize);
fmtarg_from_int!(U64, u64, u8, u16, u32, u64, usize);

impl<'a> From<bool> for FmtArg<'a> {
    fn from(v: bool) -> Self {
        FmtArg::Bool(v)
    }
}

impl<'a> From<char> for FmtArg<'a> {
    fn from(v: char) -> Self {
        FmtArg::Char(v)
    }
}

impl<'a> From<f32> for FmtArg<'a> {
    fn from(v: f32) -> Self {
        FmtArg::F64(v as f64)
    }
}

impl<'a> From<f64> for FmtArg<'a> {
    fn from(v: f64) -> Self {
        FmtArg::F64(v)
    }
}

impl<'a> From<&'a str> for FmtArg<'a> {
    fn from(v: &'a str) -> Self {
        FmtArg::Str(v)
    }
}

impl<'a> From<&'a String> for FmtArg<'a> {
    fn from(v: &'a String) -> Self {
        FmtArg::Str(v.as_str())
    }
}

impl<'a> From<String> for FmtArg<'a> {
    fn from(v: String) -> Self {
        FmtArg::Owned(v)
    }
}

/// Render `fmt` with `args` into `out`, appending.
///
/// `%v` consumes the next argument; `%%` emits `%`. A `%v` with no
/// remaining argument and any other `%`-sequence are copied through
/// verbatim. Surplus arguments are ignored.
pub fn format_into(out: &mut Vec<u8>, fmt: &str, args: &[FmtArg]) {
    let bytes = fmt.as_bytes();
    let mut next_arg = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b != b'%' || i + 1 == bytes.len() {
            out.push(b);
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'%' => {
                out.push(b'%');
                i += 2;
            }
            b'v' if next_arg < args.len() => {
                args[next_arg].write_to(out);
                next_arg += 1;
                i += 2;
            }
            _ => {
                out.push(b'%');
                i += 1;
            }
        }
    }
}

const ITOA_BUF: usize = 20; // u64::MAX is 20 digits

fn itoa_buf() -> [u8; ITOA_BUF + 1] {
    [0u8; ITOA_BUF + 1]
}

fn write_decimal_u(buf: &mut [u8; ITOA_BUF + 1], mut v: u64) -> &[u8] {
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (v % 10) as u8;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    &buf[pos..]
}

fn write_decimal(buf: &mut [u8; ITOA_BUF + 1], v: i64) -> &[u8] {
    if v >= 0 {
        return write_decimal_u(buf, v as u64);
    }
    let digits_start = {
        let s = write_decimal_u(buf, v.unsigned_abs());
        (ITOA_BUF + 1) - s.len()
    };
    buf[digits_start - 1] = b'-';
    &buf[digits_start - 1..]
}
