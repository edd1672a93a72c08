//! Per-media metadata records and their on-disk codec.
//!
//! The metadata file holds one record per line as `key<TAB>value<TAB>type`
//! with type tags `int`, `str`, `float`, and `bool`. Keys this library does
//! not know about are carried through a rewrite untouched.

use crate::tile::TileFormat;

/// A typed metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Int(i64),
    Str(String),
    Float(f64),
    Bool(bool),
}

impl MetaValue {
    /// The type tag written to disk.
    pub fn type_tag(&self) -> &'static str {
        match self {
            MetaValue::Int(_) => "int",
            MetaValue::Str(_) => "str",
            MetaValue::Float(_) => "float",
            MetaValue::Bool(_) => "bool",
        }
    }

    /// Parse a value from its string form and type tag.
    pub fn parse(value: &str, type_tag: &str) -> Result<Self, String> {
        match type_tag {
            "int" => value
                .parse::<i64>()
                .map(MetaValue::Int)
                .map_err(|e| format!("bad int value {:?}: {}", value, e)),
            "str" => Ok(MetaValue::Str(value.to_string())),
            "float" => value
                .parse::<f64>()
                .map(MetaValue::Float)
                .map_err(|e| format!("bad float value {:?}: {}", value, e)),
            "bool" => match value {
                "true" => Ok(MetaValue::Bool(true)),
                "false" => Ok(MetaValue::Bool(false)),
                other => Err(format!("bad bool value {:?}", other)),
            },
            other => Err(format!("unknown type tag {:?}", other)),
        }
    }

    fn encode(&self) -> String {
        match self {
            MetaValue::Int(v) => v.to_string(),
            MetaValue::Str(v) => v.clone(),
            MetaValue::Float(v) => v.to_string(),
            MetaValue::Bool(v) => v.to_string(),
        }
    }
}

/// Parsed metadata for one media.
///
/// Once `tiled` is true, every tile file for levels `0..=max_level` exists
/// on disk and the record stays unchanged until the media is deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMetadata {
    pub width: u32,
    pub height: u32,
    pub tilesize: u32,
    pub file_ext: TileFormat,
    pub max_level: i32,
    pub aspect_ratio: Option<f64>,
    pub tiled: bool,
    /// Keys this library does not interpret, preserved across rewrites.
    pub extra: Vec<(String, MetaValue)>,
}

impl TileMetadata {
    /// Look up any key, structured or preserved.
    pub fn get(&self, key: &str) -> Option<MetaValue> {
        match key {
            "width" => Some(MetaValue::Int(self.width as i64)),
            "height" => Some(MetaValue::Int(self.height as i64)),
            "tilesize" => Some(MetaValue::Int(self.tilesize as i64)),
            "file_ext" => Some(MetaValue::Str(self.file_ext.ext().to_string())),
            "max_level" => Some(MetaValue::Int(self.max_level as i64)),
            "aspect_ratio" => self.aspect_ratio.map(MetaValue::Float),
            "tiled" => Some(MetaValue::Bool(self.tiled)),
            other => self
                .extra
                .iter()
                .find(|(k, _)| k == other)
                .map(|(_, v)| v.clone()),
        }
    }

    /// Parse a metadata file body.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut width = None;
        let mut height = None;
        let mut tilesize = None;
        let mut file_ext = None;
        let mut max_level = None;
        let mut aspect_ratio = None;
        let mut tiled = None;
        let mut extra = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(3, '\t');
            let (key, value, tag) = match (fields.next(), fields.next(), fields.next()) {
                (Some(k), Some(v), Some(t)) => (k, v, t),
                _ => return Err(format!("line {}: expected key\\tvalue\\ttype", line_no + 1)),
            };
            let value = MetaValue::parse(value, tag).map_err(|e| format!("line {}: {}", line_no + 1, e))?;

            match (key, &value) {
                ("width", MetaValue::Int(v)) => width = Some(*v),
                ("height", MetaValue::Int(v)) => height = Some(*v),
                ("tilesize", MetaValue::Int(v)) => tilesize = Some(*v),
                ("file_ext", MetaValue::Str(v)) => {
                    file_ext =
                        Some(TileFormat::from_ext(v).ok_or_else(|| format!("unknown file_ext {:?}", v))?)
                }
                ("max_level", MetaValue::Int(v)) => max_level = Some(*v),
                ("aspect_ratio", MetaValue::Float(v)) => aspect_ratio = Some(*v),
                ("tiled", MetaValue::Bool(v)) => tiled = Some(*v),
                _ => extra.push((key.to_string(), value)),
            }
        }

        let required = |name: &str, v: Option<i64>| {
            v.ok_or_else(|| format!("missing required key {:?}", name))
        };

        let width = required("width", width)?;
        let height = required("height", height)?;
        let tilesize = required("tilesize", tilesize)?;
        let max_level = required("max_level", max_level)?;
        let file_ext = file_ext.ok_or("missing required key \"file_ext\"")?;
        let tiled = tiled.ok_or("missing required key \"tiled\"")?;

        let dim = |name: &str, v: i64| -> Result<u32, String> {
            u32::try_from(v).map_err(|_| format!("{} out of range: {}", name, v))
        };

        Ok(Self {
            width: dim("width", width)?,
            height: dim("height", height)?,
            tilesize: dim("tilesize", tilesize)?,
            file_ext,
            max_level: i32::try_from(max_level).map_err(|_| format!("max_level out of range: {}", max_level))?,
            aspect_ratio,
            tiled,
            extra,
        })
    }

    /// Serialize to the on-disk line format.
    pub fn to_file_contents(&self) -> String {
        let mut out = String::new();
        let mut push = |key: &str, value: &MetaValue| {
            out.push_str(key);
            out.push('\t');
            out.push_str(&value.encode());
            out.push('\t');
            out.push_str(value.type_tag());
            out.push('\n');
        };

        push("width", &MetaValue::Int(self.width as i64));
        push("height", &MetaValue::Int(self.height as i64));
        push("tilesize", &MetaValue::Int(self.tilesize as i64));
        push("file_ext", &MetaValue::Str(self.file_ext.ext().to_string()));
        push("max_level", &MetaValue::Int(self.max_level as i64));
        push("tiled", &MetaValue::Bool(self.tiled));
        if let Some(ratio) = self.aspect_ratio {
            push("aspect_ratio", &MetaValue::Float(ratio));
        }
        for (key, value) in &self.extra {
            push(key, value);
        }
        out
    }
}
