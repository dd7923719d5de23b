//! Binary property map persisted as `agent.bin`.
//!
//! Layout, all little-endian:
//!
//! ```text
//! [magic "WHLY"] [version u32]
//! repeated: [name_len u16] [name utf8] [ndims u8] [dim u32 x ndims] [f32 x prod(dims)]
//! ```
//!
//! A bad magic, version or truncated entry is a fatal model-load error.

use crate::error::{Error, Result};
use ndarray::ArrayD;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Named arrays persisted with the model.
pub type Props = BTreeMap<String, ArrayD<f32>>;

pub const MAGIC: [u8; 4] = *b"WHLY";
pub const VERSION: u32 = 1;

/// Largest accepted rank of a stored array.
const MAX_DIMS: u8 = 4;
/// Largest accepted number of elements of a stored array.
const MAX_ELEMENTS: usize = 1 << 28;

/// Writes the property map to a file.
pub fn save_props(path: &Path, props: &Props) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    write_entries(&mut writer, props)?;
    writer.flush()?;
    Ok(())
}

/// Writes the raw entry sequence (shared with the binary KPI container).
pub fn write_entries<W: Write>(writer: &mut W, props: &Props) -> Result<()> {
    for (name, array) in props {
        let bytes = name.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(Error::Spec(format!("property name too long: {:?}", name)));
        }
        writer.write_all(&(bytes.len() as u16).to_le_bytes())?;
        writer.write_all(bytes)?;
        let shape = array.shape();
        writer.write_all(&[shape.len() as u8])?;
        for &dim in shape {
            writer.write_all(&(dim as u32).to_le_bytes())?;
        }
        for &value in array.iter() {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Reads the property map from a file.
pub fn load_props(path: &Path) -> Result<Props> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| Error::ModelCorrupt("missing magic".to_string()))?;
    if magic != MAGIC {
        return Err(Error::ModelCorrupt(format!("bad magic {:?}", magic)));
    }
    let mut version = [0u8; 4];
    reader
        .read_exact(&mut version)
        .map_err(|_| Error::ModelCorrupt("missing version".to_string()))?;
    let version = u32::from_le_bytes(version);
    if version != VERSION {
        return Err(Error::ModelCorrupt(format!(
            "unsupported version {}",
            version
        )));
    }
    read_entries(&mut reader)
}

/// Reads entries until end of stream.
pub fn read_entries<R: Read>(reader: &mut R) -> Result<Props> {
    let mut props = Props::new();
    loop {
        let mut name_len = [0u8; 2];
        match reader.read_exact(&mut name_len) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(Error::Io(e)),
        }
        let name_len = u16::from_le_bytes(name_len) as usize;
        let mut name = vec![0u8; name_len];
        reader
            .read_exact(&mut name)
            .map_err(|_| Error::ModelCorrupt("truncated property name".to_string()))?;
        let name = String::from_utf8(name)
            .map_err(|_| Error::ModelCorrupt("property name is not UTF-8".to_string()))?;

        let mut ndims = [0u8; 1];
        reader
            .read_exact(&mut ndims)
            .map_err(|_| Error::ModelCorrupt(format!("truncated dims of {:?}", name)))?;
        if ndims[0] > MAX_DIMS {
            return Err(Error::ModelCorrupt(format!(
                "property {:?} has rank {}",
                name, ndims[0]
            )));
        }
        let mut shape = Vec::with_capacity(ndims[0] as usize);
        for _ in 0..ndims[0] {
            let mut dim = [0u8; 4];
            reader
                .read_exact(&mut dim)
                .map_err(|_| Error::ModelCorrupt(format!("truncated dims of {:?}", name)))?;
            shape.push(u32::from_le_bytes(dim) as usize);
        }
        let elements: usize = shape.iter().product();
        if elements > MAX_ELEMENTS {
            return Err(Error::ModelCorrupt(format!(
                "property {:?} has {} elements",
                name, elements
            )));
        }
        let mut data = Vec::with_capacity(elements);
        for _ in 0..elements {
            let mut value = [0u8; 4];
            reader
                .read_exact(&mut value)
                .map_err(|_| Error::ModelCorrupt(format!("truncated data of {:?}", name)))?;
            data.push(f32::from_le_bytes(value));
        }
        let array = ArrayD::from_shape_vec(shape, data)
            .map_err(|e| Error::ModelCorrupt(format!("property {:?}: {}", name, e)))?;
        props.insert(name, array);
    }
    Ok(props)
}

/// Convenience accessor for a scalar property.
pub fn scalar(props: &Props, name: &str) -> Option<f32> {
    props.get(name).and_then(|a| a.iter().next().copied())
}
