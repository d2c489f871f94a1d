//! Single-pass, PAX-aware TAR header iteration.
//!
//! The reader understands just enough TAR structure to locate entry
//! boundaries in a forward-only byte stream: UStar headers, the numeric
//! field encodings, PAX extended (`x`) and global (`g`) records, and the
//! two-zero-block terminator. It never seeks and never reads an entry
//! body on its own; callers consume exactly `size + leftovers` bytes per
//! entry through [`TarReader::copy_body`] / [`TarReader::skip_body`], or
//! use [`TarEntries`] which discards bodies automatically.
//!
//! Every yielded header retains its raw block bytes (for PAX entries the
//! body and its padding too), so archive rewriters can forward entries
//! verbatim.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use crate::config::TAR_BLOCK_SIZE;
use crate::errors::{Error, Result};

const USTAR_MAGIC: &[u8] = b"ustar\x0000";

/// Parsed TAR entry header with effective (PAX-merged) metadata.
#[derive(Debug, Clone)]
pub struct TarHeader {
    /// Entry path, `prefix/name` joined, PAX override applied.
    pub path: String,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    /// Effective body size in bytes.
    pub size: u64,
    /// Zero padding after the body up to the next 512-byte boundary.
    pub leftovers: u64,
    pub mtime: i64,
    pub chksum: u32,
    /// Type flag byte: `0`/NUL regular, `1` hardlink, `2` symlink, `3`
    /// char, `4` block, `5` dir, `6` fifo, `x`/`g` PAX.
    pub ftype: u8,
    pub linkpath: String,
    pub uname: String,
    pub gname: String,
    pub devmajor: u64,
    pub devminor: u64,
    /// Original header block; for PAX entries also the record body and
    /// its padding, so the whole entry can be forwarded verbatim.
    pub raw: Vec<u8>,
}

impl TarHeader {
    pub fn is_pax(&self) -> bool {
        matches!(self.ftype, b'x' | b'g')
    }

    /// Bytes a consumer must read to stand on the next header boundary.
    pub fn body_len(&self) -> u64 {
        self.size + self.leftovers
    }
}

/// Null-terminated header field to string, lossily.
fn nts(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Numeric header field: ASCII octal (trimmed, empty means zero) or the
/// base-256 binary extension (0o200 positive, 0o377 two's-complement
/// negative).
fn nti(field: &[u8], what: &str) -> Result<i64> {
    if field.first() == Some(&0o200) || field.first() == Some(&0o377) {
        let mut n: i128 = 0;
        for &b in &field[1..] {
            n = (n << 8) + i128::from(b);
        }
        if field[0] == 0o377 {
            n -= 1i128 << (8 * (field.len() - 1));
        }
        i64::try_from(n).map_err(|_| Error::tar(format!("numeric field `{what}` out of range")))
    } else {
        let text = nts(field);
        let text = text.trim();
        if text.is_empty() {
            return Ok(0);
        }
        i64::from_str_radix(text, 8)
            .map_err(|_| Error::tar(format!("invalid numeric field `{what}`")))
    }
}

/// Unsigned variant of [`nti`].
fn ntu(field: &[u8], what: &str) -> Result<u64> {
    let n = nti(field, what)?;
    u64::try_from(n).map_err(|_| Error::tar(format!("negative value in field `{what}`")))
}

fn padding(size: u64) -> u64 {
    match size % TAR_BLOCK_SIZE as u64 {
        0 => 0,
        rem => TAR_BLOCK_SIZE as u64 - rem,
    }
}

/// Splits a PAX body into `(key, value)` records.
///
/// Each record is `<len> <key>=<value>\n` where `<len>` counts the whole
/// record, leading length digits and trailing newline included.
fn parse_pax_records(mut data: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let bad = || Error::tar("invalid PAX record");
    let mut records = Vec::new();
    while !data.is_empty() {
        let space = data.iter().position(|&b| b == b' ').ok_or_else(bad)?;
        let total: usize = std::str::from_utf8(&data[..space])
            .map_err(|_| bad())?
            .parse()
            .map_err(|_| bad())?;
        if total < space + 2 || total > data.len() || data[total - 1] != b'\n' {
            return Err(bad());
        }
        let body = &data[space + 1..total - 1];
        data = &data[total..];

        let eq = body.iter().position(|&b| b == b'=').ok_or_else(bad)?;
        let key = std::str::from_utf8(&body[..eq])
            .map_err(|_| bad())?
            .to_owned();
        records.push((key, body[eq + 1..].to_vec()));
    }
    Ok(records)
}

/// Typed view of the PAX overrides that apply to one entry.
#[derive(Debug, Default, Clone)]
struct PaxOverrides {
    path: Option<String>,
    linkpath: Option<String>,
    uname: Option<String>,
    gname: Option<String>,
    size: Option<u64>,
    uid: Option<u64>,
    gid: Option<u64>,
    mtime: Option<i64>,
}

/// Validates a merged PAX map and decodes the keys this reader applies.
///
/// `hdrcharset` may select `ISO-IR 10646 2000 UTF-8` or `BINARY`; both
/// leave values decoded as UTF-8 here, the latter naming the default
/// stream encoding. `atime` is validated and dropped since headers carry
/// no access time. Anything else is fatal.
fn decode_pax(map: &HashMap<String, Vec<u8>>) -> Result<PaxOverrides> {
    if let Some(charset) = map.get("hdrcharset") {
        match charset.as_slice() {
            b"ISO-IR 10646 2000 UTF-8" | b"BINARY" => {}
            _ => return Err(Error::tar("unknown PAX hdrcharset")),
        }
    }

    let string = |v: &[u8]| -> Result<String> {
        String::from_utf8(v.to_vec()).map_err(|_| Error::tar("can't decode PAX string value"))
    };
    let int = |v: &[u8], what: &str| -> Result<i64> {
        std::str::from_utf8(v)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::tar(format!("can't decode PAX integer value `{what}`")))
    };
    let uint = |v: &[u8], what: &str| -> Result<u64> {
        let n = int(v, what)?;
        u64::try_from(n).map_err(|_| Error::tar(format!("negative PAX value `{what}`")))
    };

    let mut ov = PaxOverrides::default();
    for (key, value) in map {
        match key.as_str() {
            "hdrcharset" => {}
            "path" => ov.path = Some(string(value)?),
            "linkpath" => ov.linkpath = Some(string(value)?),
            "uname" => ov.uname = Some(string(value)?),
            "gname" => ov.gname = Some(string(value)?),
            "size" => ov.size = Some(uint(value, "size")?),
            "uid" => ov.uid = Some(uint(value, "uid")?),
            "gid" => ov.gid = Some(uint(value, "gid")?),
            "mtime" => ov.mtime = Some(int(value, "mtime")?),
            // Validated for well-formedness, but headers carry no atime.
            "atime" => {
                int(value, "atime")?;
            }
            _ => return Err(Error::tar(format!("unknown PAX header `{key}`"))),
        }
    }
    Ok(ov)
}

/// Streaming TAR header reader.
///
/// `x` records override the next non-PAX entry only; `g` records keep
/// applying until a later `g` supersedes them. PAX entries themselves are
/// yielded (size 0, raw bytes complete) so rewriters can forward them.
pub struct TarReader<R: Read> {
    inner: R,
    global_pax: HashMap<String, Vec<u8>>,
    pending_pax: HashMap<String, Vec<u8>>,
    empty: u32,
    done: bool,
}

impl<R: Read> TarReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            global_pax: HashMap::new(),
            pending_pax: HashMap::new(),
            empty: 0,
            done: false,
        }
    }

    fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::tar("unexpected EOF")
            } else {
                Error::Io(e)
            }
        })
    }

    /// Parses and returns the next header, or `None` at the archive
    /// terminator. The caller must consume the entry body (if any) before
    /// calling this again.
    pub fn next_header(&mut self) -> Result<Option<TarHeader>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let mut block = vec![0u8; TAR_BLOCK_SIZE];
            self.read_exact_or_eof(&mut block)?;

            let path = nts(&block[0..100]);
            let size = nti(&block[124..136], "size")?;

            if path.is_empty() && size == 0 {
                // Empty header; the second one terminates the archive.
                self.empty += 1;
                if self.empty >= 2 {
                    self.done = true;
                    return Ok(None);
                }
                continue;
            }

            if &block[257..265] != USTAR_MAGIC {
                return Err(Error::tar("invalid header, expecting UStar format"));
            }

            let mode = u32::try_from(ntu(&block[100..108], "mode")?)
                .map_err(|_| Error::tar("invalid numeric field `mode`"))?;
            let uid = ntu(&block[108..116], "uid")?;
            let gid = ntu(&block[116..124], "gid")?;
            let mtime = nti(&block[136..148], "mtime")?;
            let chksum = u32::try_from(ntu(&block[148..156], "chksum")?)
                .map_err(|_| Error::tar("invalid numeric field `chksum`"))?;
            let ftype = block[156];
            let linkpath = nts(&block[157..257]);
            let uname = nts(&block[265..297]);
            let gname = nts(&block[297..329]);
            let devmajor = ntu(&block[329..337], "devmajor")?;
            let devminor = ntu(&block[337..345], "devminor")?;
            let prefix = nts(&block[345..500]);

            let path = if prefix.is_empty() {
                path
            } else {
                format!("{prefix}/{path}")
            };

            if ftype == b'x' || ftype == b'g' {
                let size =
                    u64::try_from(size).map_err(|_| Error::tar("negative PAX header size"))?;
                let pad = padding(size);

                let mut body = vec![
                    0u8;
                    usize::try_from(size)
                        .map_err(|_| Error::tar("oversized PAX header"))?
                ];
                self.read_exact_or_eof(&mut body)?;
                let mut pad_bytes = vec![0u8; pad as usize];
                self.read_exact_or_eof(&mut pad_bytes)?;

                let records = parse_pax_records(&body)?;
                if ftype == b'g' {
                    self.global_pax = records.into_iter().collect();
                    self.pending_pax = self.global_pax.clone();
                } else {
                    self.pending_pax = self.global_pax.clone();
                    self.pending_pax.extend(records);
                }
                // Surface malformed records right away, not at the next
                // entry.
                decode_pax(&self.pending_pax)?;

                let mut raw = block;
                raw.extend_from_slice(&body);
                raw.extend_from_slice(&pad_bytes);

                return Ok(Some(TarHeader {
                    path,
                    mode,
                    uid,
                    gid,
                    size: 0,
                    leftovers: 0,
                    mtime,
                    chksum,
                    ftype,
                    linkpath,
                    uname,
                    gname,
                    devmajor,
                    devminor,
                    raw,
                }));
            }

            let ov = decode_pax(&self.pending_pax)?;
            let size = ov.size.map_or_else(
                || u64::try_from(size).map_err(|_| Error::tar("negative entry size")),
                Ok,
            )?;

            let header = TarHeader {
                path: ov.path.unwrap_or(path),
                mode,
                uid: ov.uid.unwrap_or(uid),
                gid: ov.gid.unwrap_or(gid),
                size,
                leftovers: padding(size),
                mtime: ov.mtime.unwrap_or(mtime),
                chksum,
                ftype,
                linkpath: ov.linkpath.unwrap_or(linkpath),
                uname: ov.uname.unwrap_or(uname),
                gname: ov.gname.unwrap_or(gname),
                devmajor,
                devminor,
                raw: block,
            };

            // Per-entry overrides are spent; global ones keep applying.
            self.pending_pax = self.global_pax.clone();

            return Ok(Some(header));
        }
    }

    /// Copies exactly the entry body plus its padding into `out`.
    pub fn copy_body(&mut self, header: &TarHeader, out: &mut dyn Write) -> Result<()> {
        let want = header.body_len();
        let copied = io::copy(&mut (&mut self.inner).take(want), out)?;
        if copied != want {
            return Err(Error::tar("unexpected EOF"));
        }
        Ok(())
    }

    /// Reads and discards the entry body plus its padding.
    pub fn skip_body(&mut self, header: &TarHeader) -> Result<()> {
        self.copy_body(header, &mut io::sink())
    }
}

/// Body-discarding variant: yields only non-PAX headers and consumes
/// every entry body itself. This is what a listing needs.
pub struct TarEntries<R: Read> {
    reader: TarReader<R>,
}

impl<R: Read> TarEntries<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: TarReader::new(inner),
        }
    }

    pub fn next_entry(&mut self) -> Result<Option<TarHeader>> {
        loop {
            let Some(header) = self.reader.next_header()? else {
                return Ok(None);
            };
            self.reader.skip_body(&header)?;
            if !header.is_pax() {
                return Ok(Some(header));
            }
        }
    }
}
