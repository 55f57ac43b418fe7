use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use serde_json::Value;

use super::types::AbiDef;
use crate::errors::DecodeError;

const NAME_CHARS: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// Render an on-chain name (base-32 packed u64) as a string.
pub fn name_to_string(value: u64) -> String {
    let mut out = [b'.'; 13];
    let mut tmp = value;
    for i in 0..13 {
        let mask = if i == 0 { 0x0f } else { 0x1f };
        out[12 - i] = NAME_CHARS[(tmp & mask) as usize];
        tmp >>= if i == 0 { 4 } else { 5 };
    }
    let s = String::from_utf8_lossy(&out).into_owned();
    s.trim_end_matches('.').to_owned()
}

/// Pack a name string back into its u64 form.
pub fn string_to_name(s: &str) -> u64 {
    fn char_to_symbol(c: u8) -> u64 {
        match c {
            b'a'..=b'z' => (c - b'a') as u64 + 6,
            b'1'..=b'5' => (c - b'1') as u64 + 1,
            _ => 0,
        }
    }
    let bytes = s.as_bytes();
    let mut name: u64 = 0;
    for (i, &c) in bytes.iter().enumerate().take(12) {
        name |= (char_to_symbol(c) & 0x1f) << (64 - 5 * (i + 1));
    }
    if bytes.len() >= 13 {
        name |= char_to_symbol(bytes[12]) & 0x0f;
    }
    name
}

fn symbol_code_to_string(mut raw: u64) -> String {
    let mut out = String::new();
    while raw > 0 {
        out.push((raw & 0xff) as u8 as char);
        raw >>= 8;
    }
    out
}

fn symbol_to_string(raw: u64) -> String {
    format!("{},{}", raw & 0xff, symbol_code_to_string(raw >> 8))
}

fn asset_to_string(amount: i64, symbol_raw: u64) -> String {
    let precision = (symbol_raw & 0xff) as u32;
    let code = symbol_code_to_string(symbol_raw >> 8);
    if precision == 0 {
        return format!("{} {}", amount, code);
    }
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let scale = 10u64.pow(precision);
    format!(
        "{}{}.{:0width$} {}",
        sign,
        abs / scale,
        abs % scale,
        code,
        width = precision as usize
    )
}

/// Little-endian cursor over a binary payload.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize, ctx: &str) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(DecodeError::Eof(ctx.to_owned()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self, ctx: &str) -> Result<u8, DecodeError> {
        Ok(self.take(1, ctx)?[0])
    }

    pub fn read_i8(&mut self, ctx: &str) -> Result<i8, DecodeError> {
        Ok(self.read_u8(ctx)? as i8)
    }

    pub fn read_u16(&mut self, ctx: &str) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take(2, ctx)?.try_into().unwrap()))
    }

    pub fn read_i16(&mut self, ctx: &str) -> Result<i16, DecodeError> {
        Ok(self.read_u16(ctx)? as i16)
    }

    pub fn read_u32(&mut self, ctx: &str) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4, ctx)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self, ctx: &str) -> Result<i32, DecodeError> {
        Ok(self.read_u32(ctx)? as i32)
    }

    pub fn read_u64(&mut self, ctx: &str) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take(8, ctx)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self, ctx: &str) -> Result<i64, DecodeError> {
        Ok(self.read_u64(ctx)? as i64)
    }

    pub fn read_u128(&mut self, ctx: &str) -> Result<u128, DecodeError> {
        Ok(u128::from_le_bytes(self.take(16, ctx)?.try_into().unwrap()))
    }

    pub fn read_f32(&mut self, ctx: &str) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.take(4, ctx)?.try_into().unwrap()))
    }

    pub fn read_f64(&mut self, ctx: &str) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take(8, ctx)?.try_into().unwrap()))
    }

    pub fn read_varuint32(&mut self, ctx: &str) -> Result<u32, DecodeError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8(ctx)?;
            result |= ((byte & 0x7f) as u64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
            if shift >= 35 {
                return Err(DecodeError::VarintOverflow(ctx.to_owned()));
            }
        }
        if result > u32::MAX as u64 {
            return Err(DecodeError::VarintOverflow(ctx.to_owned()));
        }
        Ok(result as u32)
    }

    pub fn read_varint32(&mut self, ctx: &str) -> Result<i32, DecodeError> {
        let raw = self.read_varuint32(ctx)?;
        // zigzag
        Ok(((raw >> 1) as i32) ^ -((raw & 1) as i32))
    }

    pub fn read_name(&mut self, ctx: &str) -> Result<String, DecodeError> {
        Ok(name_to_string(self.read_u64(ctx)?))
    }

    pub fn read_bytes(&mut self, ctx: &str) -> Result<&'a [u8], DecodeError> {
        let len = self.read_varuint32(ctx)? as usize;
        self.take(len, ctx)
    }

    pub fn read_string(&mut self, ctx: &str) -> Result<String, DecodeError> {
        let bytes = self.read_bytes(ctx)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "bool"
            | "uint8"
            | "int8"
            | "uint16"
            | "int16"
            | "uint32"
            | "int32"
            | "uint64"
            | "int64"
            | "uint128"
            | "int128"
            | "varuint32"
            | "varint32"
            | "float32"
            | "float64"
            | "float128"
            | "time_point"
            | "time_point_sec"
            | "block_timestamp_type"
            | "name"
            | "bytes"
            | "string"
            | "checksum160"
            | "checksum256"
            | "checksum512"
            | "public_key"
            | "signature"
            | "symbol"
            | "symbol_code"
            | "asset"
            | "extended_asset"
    )
}

fn decode_builtin(name: &str, r: &mut ByteReader) -> Result<Option<Value>, DecodeError> {
    let value = match name {
        "bool" => json!(r.read_u8(name)? != 0),
        "uint8" => json!(r.read_u8(name)?),
        "int8" => json!(r.read_i8(name)?),
        "uint16" => json!(r.read_u16(name)?),
        "int16" => json!(r.read_i16(name)?),
        "uint32" => json!(r.read_u32(name)?),
        "int32" => json!(r.read_i32(name)?),
        // 64+ bit integers are rendered as strings, the way chain APIs do,
        // to keep them exact through JSON.
        "uint64" => json!(r.read_u64(name)?.to_string()),
        "int64" => json!(r.read_i64(name)?.to_string()),
        "uint128" => json!(r.read_u128(name)?.to_string()),
        "int128" => json!((r.read_u128(name)? as i128).to_string()),
        "varuint32" => json!(r.read_varuint32(name)?),
        "varint32" => json!(r.read_varint32(name)?),
        "float32" => json!(r.read_f32(name)?),
        "float64" => json!(r.read_f64(name)?),
        "float128" => json!(hex::encode(r.take(16, name)?)),
        // Microseconds since epoch.
        "time_point" => json!(r.read_i64(name)?.to_string()),
        // Seconds since epoch.
        "time_point_sec" => json!(r.read_u32(name)?),
        // Half-second slots since the chain epoch.
        "block_timestamp_type" => json!(r.read_u32(name)?),
        "name" => json!(r.read_name(name)?),
        "bytes" => json!(hex::encode(r.read_bytes(name)?)),
        "string" => json!(r.read_string(name)?),
        "checksum160" => json!(hex::encode(r.take(20, name)?)),
        "checksum256" => json!(hex::encode(r.take(32, name)?)),
        "checksum512" => json!(hex::encode(r.take(64, name)?)),
        "public_key" => {
            let tag = r.read_u8(name)?;
            json!(format!("{:02x}{}", tag, hex::encode(r.take(33, name)?)))
        }
        "signature" => {
            let tag = r.read_u8(name)?;
            json!(format!("{:02x}{}", tag, hex::encode(r.take(65, name)?)))
        }
        "symbol" => json!(symbol_to_string(r.read_u64(name)?)),
        "symbol_code" => json!(symbol_code_to_string(r.read_u64(name)?)),
        "asset" => {
            let amount = r.read_i64(name)?;
            let symbol = r.read_u64(name)?;
            json!(asset_to_string(amount, symbol))
        }
        "extended_asset" => {
            let amount = r.read_i64(name)?;
            let symbol = r.read_u64(name)?;
            let contract = r.read_name(name)?;
            json!({
                "quantity": asset_to_string(amount, symbol),
                "contract": contract,
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// Fast decoder backend: the ABI pre-resolved into flat lookup tables.
///
/// Typedefs are fully resolved and struct base chains inlined, so the
/// hot decode path runs without any per-field resolution. ABIs the
/// compiler cannot flatten (unknown or cyclic types) are rejected and
/// the decoder falls back to the tree-walking backend.
struct CompiledAbi {
    aliases: HashMap<String, String>,
    structs: HashMap<String, Vec<(String, String)>>,
}

impl CompiledAbi {
    fn try_compile(abi: &AbiDef) -> Result<Self, DecodeError> {
        let mut aliases = HashMap::new();
        for t in &abi.types {
            let resolved = abi.resolve(&t.new_type_name);
            if aliases.contains_key(resolved) || resolved == t.new_type_name {
                return Err(DecodeError::BadAbi(format!(
                    "cyclic typedef `{}`",
                    t.new_type_name
                )));
            }
            aliases.insert(t.new_type_name.clone(), resolved.to_owned());
        }

        let mut structs: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for s in &abi.structs {
            let mut fields = Vec::new();
            let mut seen: HashSet<&str> = HashSet::new();
            let mut chain = Vec::new();
            let mut current = Some(s);
            while let Some(def) = current {
                if !seen.insert(&def.name) {
                    return Err(DecodeError::BadAbi(format!("cyclic struct base `{}`", s.name)));
                }
                chain.push(def);
                current = match def.base.as_str() {
                    "" => None,
                    base => Some(
                        abi.structure(base)
                            .ok_or_else(|| DecodeError::UnknownType(base.to_owned()))?,
                    ),
                };
            }
            // Base fields come first.
            for def in chain.iter().rev() {
                for f in &def.fields {
                    fields.push((f.name.clone(), abi.resolve(&f.type_name).to_owned()));
                }
            }
            structs.insert(s.name.clone(), fields);
        }

        let compiled = Self { aliases, structs };
        // Every referenced leaf must be decodable.
        for fields in compiled.structs.values() {
            for (_, type_name) in fields {
                let leaf = strip_type_suffixes(type_name);
                let leaf = compiled.aliases.get(leaf).map(String::as_str).unwrap_or(leaf);
                if !is_builtin(leaf)
                    && !compiled.structs.contains_key(leaf)
                    && abi.variant(leaf).is_none()
                {
                    return Err(DecodeError::UnknownType(leaf.to_owned()));
                }
            }
        }
        Ok(compiled)
    }
}

fn strip_type_suffixes(name: &str) -> &str {
    let mut current = name;
    loop {
        if let Some(inner) = current.strip_suffix("[]") {
            current = inner;
        } else if let Some(inner) = current.strip_suffix('?') {
            current = inner;
        } else if let Some(inner) = current.strip_suffix('$') {
            current = inner;
        } else {
            return current;
        }
    }
}

/// Decoder for one ABI. Prefers the compiled fast backend.
pub struct AbiDecoder {
    abi: Arc<AbiDef>,
    compiled: Option<CompiledAbi>,
}

impl AbiDecoder {
    pub fn new(abi: Arc<AbiDef>) -> Self {
        let compiled = match CompiledAbi::try_compile(&abi) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!("falling back to portable ABI decoder: {e}");
                None
            }
        };
        Self { abi, compiled }
    }

    #[cfg(test)]
    fn portable(abi: Arc<AbiDef>) -> Self {
        Self {
            abi,
            compiled: None,
        }
    }

    pub fn abi(&self) -> &AbiDef {
        &self.abi
    }

    pub fn is_fast(&self) -> bool {
        self.compiled.is_some()
    }

    /// Decode `data` as `type_name`.
    ///
    /// Fails if the decoded byte count does not equal the input length.
    pub fn decode(&self, type_name: &str, data: &[u8]) -> Result<Value, DecodeError> {
        let mut reader = ByteReader::new(data);
        let value = self.decode_type(type_name, &mut reader)?;
        if reader.pos() != data.len() {
            return Err(DecodeError::TrailingBytes {
                type_name: type_name.to_owned(),
                consumed: reader.pos(),
                len: data.len(),
            });
        }
        Ok(value)
    }

    /// Decode an action payload by action name.
    pub fn decode_action(&self, action: &str, data: &[u8]) -> Result<Value, DecodeError> {
        let type_name = self
            .abi
            .action_type(action)
            .ok_or_else(|| DecodeError::UnknownType(format!("action `{action}`")))?
            .to_owned();
        self.decode(&type_name, data)
    }

    /// Decode a contract table row by table name.
    pub fn decode_table_row(&self, table: &str, data: &[u8]) -> Result<Value, DecodeError> {
        let type_name = self
            .abi
            .table_type(table)
            .ok_or_else(|| DecodeError::UnknownType(format!("table `{table}`")))?
            .to_owned();
        self.decode(&type_name, data)
    }

    fn decode_type(&self, type_name: &str, r: &mut ByteReader) -> Result<Value, DecodeError> {
        if let Some(inner) = type_name.strip_suffix("[]") {
            let count = r.read_varuint32(type_name)?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(self.decode_type(inner, r)?);
            }
            return Ok(Value::Array(items));
        }
        if let Some(inner) = type_name.strip_suffix('?') {
            return match r.read_u8(type_name)? {
                0 => Ok(Value::Null),
                _ => self.decode_type(inner, r),
            };
        }
        if let Some(inner) = type_name.strip_suffix('$') {
            // Binary extension: absent once the payload is exhausted.
            if r.exhausted() {
                return Ok(Value::Null);
            }
            return self.decode_type(inner, r);
        }

        let resolved = match &self.compiled {
            Some(c) => c
                .aliases
                .get(type_name)
                .map(String::as_str)
                .unwrap_or(type_name),
            None => self.abi.resolve(type_name),
        };
        if resolved != type_name {
            return self.decode_type(resolved, r);
        }

        if let Some(value) = decode_builtin(resolved, r)? {
            return Ok(value);
        }

        if let Some(compiled) = &self.compiled {
            if let Some(fields) = compiled.structs.get(resolved) {
                let mut map = serde_json::Map::with_capacity(fields.len());
                for (field, field_type) in fields {
                    map.insert(field.clone(), self.decode_type(field_type, r)?);
                }
                return Ok(Value::Object(map));
            }
        } else if let Some(s) = self.abi.structure(resolved) {
            let mut map = serde_json::Map::new();
            self.decode_struct_into(s, r, &mut map)?;
            return Ok(Value::Object(map));
        }

        if let Some(variant) = self.abi.variant(resolved) {
            let index = r.read_varuint32(resolved)?;
            let vtype = variant
                .types
                .get(index as usize)
                .ok_or_else(|| DecodeError::UnknownType(format!("{resolved}[{index}]")))?
                .clone();
            let inner = self.decode_type(&vtype, r)?;
            return Ok(json!([vtype, inner]));
        }

        Err(DecodeError::UnknownType(resolved.to_owned()))
    }

    fn decode_struct_into(
        &self,
        s: &super::types::StructDef,
        r: &mut ByteReader,
        map: &mut serde_json::Map<String, Value>,
    ) -> Result<(), DecodeError> {
        if !s.base.is_empty() {
            let base = self
                .abi
                .structure(&s.base)
                .ok_or_else(|| DecodeError::UnknownType(s.base.clone()))?;
            self.decode_struct_into(base, r, map)?;
        }
        for field in &s.fields {
            map.insert(field.name.clone(), self.decode_type(&field.type_name, r)?);
        }
        Ok(())
    }

    /// Decode a state-history `table_delta[]` payload.
    ///
    /// Each row's `data` field is recursively decoded against the table
    /// type declared by the enclosing delta. Anything but the known
    /// delta variant is fatal.
    pub fn decode_deltas(&self, data: &[u8]) -> Result<Value, DecodeError> {
        let mut r = ByteReader::new(data);
        let count = r.read_varuint32("table_delta[]")?;
        let variant = self
            .abi
            .variant("table_delta")
            .ok_or_else(|| DecodeError::BadAbi("missing table_delta variant".to_owned()))?;
        let mut deltas = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let index = r.read_varuint32("table_delta")?;
            let vtype = variant
                .types
                .get(index as usize)
                .ok_or_else(|| DecodeError::UnsupportedDelta(format!("table_delta[{index}]")))?;
            if vtype != "table_delta_v0" {
                return Err(DecodeError::UnsupportedDelta(vtype.clone()));
            }
            let name = r.read_string("table_delta_v0.name")?;
            let row_type = self
                .abi
                .table_type(&name)
                .ok_or_else(|| DecodeError::UnsupportedDelta(name.clone()))?
                .to_owned();
            let row_count = r.read_varuint32("table_delta_v0.rows")?;
            let mut rows = Vec::with_capacity(row_count as usize);
            for _ in 0..row_count {
                let present = r.read_u8("row.present")? != 0;
                let row_data = r.read_bytes("row.data")?;
                let decoded = self.decode(&row_type, row_data)?;
                rows.push(json!({"present": present, "data": decoded}));
            }
            deltas.push(json!({"name": name, "rows": rows}));
        }
        if !r.exhausted() {
            return Err(DecodeError::TrailingBytes {
                type_name: "table_delta[]".to_owned(),
                consumed: r.pos(),
                len: data.len(),
            });
        }
        Ok(Value::Array(deltas))
    }
}

/// Decode a binary-packed ABI, as carried by `setabi` action payloads.
pub fn decode_packed_abi(data: &[u8]) -> Result<AbiDef, DecodeError> {
    use super::types::*;

    let mut r = ByteReader::new(data);
    let version = r.read_string("abi.version")?;

    let mut types = Vec::new();
    for _ in 0..r.read_varuint32("abi.types")? {
        types.push(TypeDef {
            new_type_name: r.read_string("typedef.new_type_name")?,
            type_name: r.read_string("typedef.type")?,
        });
    }

    let mut structs = Vec::new();
    for _ in 0..r.read_varuint32("abi.structs")? {
        let name = r.read_string("struct.name")?;
        let base = r.read_string("struct.base")?;
        let mut fields = Vec::new();
        for _ in 0..r.read_varuint32("struct.fields")? {
            fields.push(FieldDef {
                name: r.read_string("field.name")?,
                type_name: r.read_string("field.type")?,
            });
        }
        structs.push(StructDef { name, base, fields });
    }

    let mut actions = Vec::new();
    for _ in 0..r.read_varuint32("abi.actions")? {
        let name = r.read_name("action.name")?;
        let type_name = r.read_string("action.type")?;
        let _ricardian = r.read_string("action.ricardian_contract")?;
        actions.push(ActionDef { name, type_name });
    }

    let mut tables = Vec::new();
    for _ in 0..r.read_varuint32("abi.tables")? {
        let name = r.read_name("table.name")?;
        let _index_type = r.read_string("table.index_type")?;
        for _ in 0..r.read_varuint32("table.key_names")? {
            let _ = r.read_string("table.key_name")?;
        }
        for _ in 0..r.read_varuint32("table.key_types")? {
            let _ = r.read_string("table.key_type")?;
        }
        let type_name = r.read_string("table.type")?;
        tables.push(TableDef { name, type_name });
    }

    // Optional tail sections. Older ABIs simply end here.
    let mut variants = Vec::new();
    if !r.exhausted() {
        for _ in 0..r.read_varuint32("abi.ricardian_clauses")? {
            let _ = r.read_string("clause.id")?;
            let _ = r.read_string("clause.body")?;
        }
    }
    if !r.exhausted() {
        for _ in 0..r.read_varuint32("abi.error_messages")? {
            let _ = r.read_u64("error.code")?;
            let _ = r.read_string("error.message")?;
        }
    }
    if !r.exhausted() {
        for _ in 0..r.read_varuint32("abi.extensions")? {
            let _ = r.read_u16("extension.type")?;
            let _ = r.read_bytes("extension.data")?;
        }
    }
    if !r.exhausted() {
        for _ in 0..r.read_varuint32("abi.variants")? {
            let name = r.read_string("variant.name")?;
            let mut vtypes = Vec::new();
            for _ in 0..r.read_varuint32("variant.types")? {
                vtypes.push(r.read_string("variant.type")?);
            }
            variants.push(VariantDef {
                name,
                types: vtypes,
            });
        }
    }

    Ok(AbiDef {
        version,
        types,
        structs,
        actions,
        tables,
        variants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_abi() -> Arc<AbiDef> {
        let doc = r#"{
            "version": "eosio::abi/1.1",
            "types": [
                {"new_type_name": "account_name", "type": "name"}
            ],
            "structs": [
                {
                    "name": "transfer",
                    "base": "",
                    "fields": [
                        {"name": "from", "type": "account_name"},
                        {"name": "to", "type": "account_name"},
                        {"name": "quantity", "type": "asset"},
                        {"name": "memo", "type": "string"}
                    ]
                },
                {
                    "name": "tagged",
                    "base": "",
                    "fields": [
                        {"name": "value", "type": "holder"}
                    ]
                },
                {
                    "name": "int_holder",
                    "base": "",
                    "fields": [
                        {"name": "n", "type": "uint32"}
                    ]
                }
            ],
            "actions": [
                {"name": "transfer", "type": "transfer"}
            ],
            "tables": [],
            "variants": [
                {"name": "holder", "types": ["int_holder", "string"]}
            ]
        }"#;
        Arc::new(AbiDef::from_json(doc).unwrap())
    }

    fn encode_name(s: &str) -> Vec<u8> {
        string_to_name(s).to_le_bytes().to_vec()
    }

    fn encode_string(s: &str) -> Vec<u8> {
        let mut out = vec![s.len() as u8];
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn test_name_round_trip() {
        for name in ["eosio", "atomicassets", "alice", "a.b.c", "atomicmarket"] {
            assert_eq!(name_to_string(string_to_name(name)), name);
        }
    }

    #[test]
    fn test_varuint_decoding() {
        let mut r = ByteReader::new(&[0x80, 0x01]);
        assert_eq!(r.read_varuint32("x").unwrap(), 128);
        let mut r = ByteReader::new(&[0x05]);
        assert_eq!(r.read_varuint32("x").unwrap(), 5);
    }

    #[test]
    fn test_decode_transfer_action() {
        let abi = test_abi();
        let mut data = Vec::new();
        data.extend(encode_name("alice"));
        data.extend(encode_name("bob"));
        // 1.0000 WAX
        data.extend(10000i64.to_le_bytes());
        let symbol: u64 = 4 | (u64::from_le_bytes(*b"WAX\0\0\0\0\0") << 8);
        data.extend(symbol.to_le_bytes());
        data.extend(encode_string("hi"));

        let decoder = AbiDecoder::new(abi);
        assert!(decoder.is_fast());
        let value = decoder.decode_action("transfer", &data).unwrap();
        assert_eq!(value["from"], "alice");
        assert_eq!(value["to"], "bob");
        assert_eq!(value["quantity"], "1.0000 WAX");
        assert_eq!(value["memo"], "hi");
    }

    #[test]
    fn test_fast_and_portable_agree() {
        let abi = test_abi();
        let mut data = Vec::new();
        data.extend(encode_name("alice"));
        data.extend(encode_name("bob"));
        data.extend(42i64.to_le_bytes());
        let symbol: u64 = u64::from_le_bytes(*b"\0EOS\0\0\0\0");
        data.extend(symbol.to_le_bytes());
        data.extend(encode_string(""));

        let fast = AbiDecoder::new(abi.clone());
        let portable = AbiDecoder::portable(abi);
        assert_eq!(
            fast.decode("transfer", &data).unwrap(),
            portable.decode("transfer", &data).unwrap()
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let abi = test_abi();
        let mut data = Vec::new();
        data.extend(encode_name("alice"));
        data.extend(encode_name("bob"));
        data.extend(42i64.to_le_bytes());
        data.extend(0u64.to_le_bytes());
        data.extend(encode_string(""));
        data.push(0xff); // one byte too many

        let decoder = AbiDecoder::new(abi);
        match decoder.decode("transfer", &data) {
            Err(DecodeError::TrailingBytes { consumed, len, .. }) => {
                assert_eq!(len, consumed + 1);
            }
            other => panic!("expected trailing bytes error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_variant() {
        let abi = test_abi();
        let decoder = AbiDecoder::new(abi);
        // index 0 -> int_holder { n: 7 }
        let mut data = vec![0x00];
        data.extend(7u32.to_le_bytes());
        let value = decoder.decode("holder", &data).unwrap();
        assert_eq!(value[0], "int_holder");
        assert_eq!(value[1]["n"], 7);
    }

    #[test]
    fn test_decode_optional_and_array() {
        let abi = test_abi();
        let decoder = AbiDecoder::new(abi);
        let value = decoder.decode("uint32?", &[0]).unwrap();
        assert_eq!(value, Value::Null);

        let mut data = vec![0x02];
        data.extend(1u32.to_le_bytes());
        data.extend(2u32.to_le_bytes());
        let value = decoder.decode("uint32[]", &data).unwrap();
        assert_eq!(value, json!([1, 2]));
    }

    #[test]
    fn test_unknown_type_falls_back_to_portable() {
        let doc = r#"{
            "version": "eosio::abi/1.1",
            "structs": [
                {"name": "broken", "base": "", "fields": [
                    {"name": "x", "type": "no_such_type"}
                ]}
            ]
        }"#;
        let abi = Arc::new(AbiDef::from_json(doc).unwrap());
        let decoder = AbiDecoder::new(abi);
        assert!(!decoder.is_fast());
        // Decoding the broken struct still errors.
        assert!(matches!(
            decoder.decode("broken", &[0]),
            Err(DecodeError::UnknownType(_))
        ));
    }

    fn ship_like_abi() -> Arc<AbiDef> {
        let doc = r#"{
            "version": "eosio::abi/1.1",
            "structs": [
                {"name": "contract_row_v0", "base": "", "fields": [
                    {"name": "code", "type": "name"},
                    {"name": "scope", "type": "name"},
                    {"name": "table", "type": "name"},
                    {"name": "primary_key", "type": "uint64"},
                    {"name": "payer", "type": "name"},
                    {"name": "value", "type": "bytes"}
                ]}
            ],
            "tables": [
                {"name": "contract_row", "type": "contract_row"}
            ],
            "variants": [
                {"name": "table_delta", "types": ["table_delta_v0"]},
                {"name": "contract_row", "types": ["contract_row_v0"]}
            ]
        }"#;
        Arc::new(AbiDef::from_json(doc).unwrap())
    }

    #[test]
    fn test_decode_deltas_recurses_into_rows() {
        let abi = ship_like_abi();
        let decoder = AbiDecoder::new(abi);

        // row payload: contract_row variant index 0 + struct fields
        let mut row = vec![0x00];
        row.extend(encode_name("atomicassets"));
        row.extend(encode_name("atomicassets"));
        row.extend(encode_name("assets"));
        row.extend(42u64.to_le_bytes());
        row.extend(encode_name("alice"));
        row.extend([0x00]); // empty value bytes

        let mut data = Vec::new();
        data.push(0x01); // one delta
        data.push(0x00); // variant index 0 -> table_delta_v0
        data.extend(encode_string("contract_row"));
        data.push(0x01); // one row
        data.push(0x01); // present
        data.push(row.len() as u8);
        data.extend(&row);

        let value = decoder.decode_deltas(&data).unwrap();
        let delta = &value[0];
        assert_eq!(delta["name"], "contract_row");
        let row = &delta["rows"][0];
        assert_eq!(row["present"], true);
        assert_eq!(row["data"][0], "contract_row_v0");
        assert_eq!(row["data"][1]["table"], "assets");
        assert_eq!(row["data"][1]["primary_key"], "42");
    }

    #[test]
    fn test_unknown_delta_variant_is_fatal() {
        let doc = r#"{
            "version": "eosio::abi/1.1",
            "variants": [
                {"name": "table_delta", "types": ["table_delta_v0", "table_delta_v1"]}
            ]
        }"#;
        let abi = Arc::new(AbiDef::from_json(doc).unwrap());
        let decoder = AbiDecoder::new(abi);
        let data = vec![0x01, 0x01]; // one delta, variant index 1
        assert!(matches!(
            decoder.decode_deltas(&data),
            Err(DecodeError::UnsupportedDelta(_))
        ));
    }

    #[test]
    fn test_packed_abi_round_trip() {
        // version + 0 types + 1 struct + 1 action + 0 tables
        let mut data = Vec::new();
        data.extend(encode_string("eosio::abi/1.1"));
        data.push(0x00); // types
        data.push(0x01); // structs
        data.extend(encode_string("noop"));
        data.extend(encode_string(""));
        data.push(0x01);
        data.extend(encode_string("account"));
        data.extend(encode_string("name"));
        data.push(0x01); // actions
        data.extend(encode_name("noop"));
        data.extend(encode_string("noop"));
        data.extend(encode_string("")); // ricardian
        data.push(0x00); // tables

        let abi = decode_packed_abi(&data).unwrap();
        assert_eq!(abi.version, "eosio::abi/1.1");
        assert_eq!(abi.structs.len(), 1);
        assert_eq!(abi.structs[0].fields[0].name, "account");
        assert_eq!(abi.action_type("noop"), Some("noop"));
    }
}
