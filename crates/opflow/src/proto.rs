// Proto - protobuf wire format for operator configs and jobs
//
// Configs are persisted as protobuf messages whose field names and nesting
// follow the per-kind parameter groups of OperatorConfig. Blob references
// are stored as logical blob names ("op/blob"), layouts and padding modes
// as their lowercase names, exactly as they appear in JSON.
//
// We implement a minimal protobuf encoder/decoder (no external crate
// needed) covering the wire types the schema uses:
//
//   0  varint     integers, bools, enums
//   1  fixed64    dropout rate (double)
//   2  len-delim  strings, nested messages, packed repeated integers
//
// Repeated integers are written packed; the decoder accepts both packed and
// unpacked encodings. Unknown fields are skipped.
//
// SCHEMA (field numbers):
//
//   JobProto               { 1 name, 2 scope_symbol_id, 3 op[] }
//   OperatorConf           { 1 name, 2 scope_symbol_id, 100..111 conf oneof }
//   ShapeProto             { 1 dim[] }
//   SbpParallel            { 1 split_axis | 2 broadcast | 3 partial_sum }
//   input_conf             { 1 out, 2 shape, 3 data_type, 4 sbp }
//   variable_conf          { 1 out, 2 shape, 3 data_type }
//   conv_2d_conf           { 1 in, 2 out, 3 weight, 4 filters, 5 padding,
//                            6 data_format, 7 kernel_size[], 8 strides[],
//                            9 dilation_rate[], 10 use_bias }
//   conv_conf              { 1 padding, 2 data_format, 3 kernel_size[],
//                            4 strides[], 5 dilation_rate[] }
//   deconv_conf            { 1 in, 2 out, 3 filter, 4 filters, 5 conv_conf, 6 use_bias }
//   *_pooling_*d_conf      { 1 in, 2 out, 3 pool_size[], 4 strides[], 5 padding, 6 data_format }
//   softmax_conf           { 1 in, 2 out, 3 axis }
//   sparse_cross_entropy_conf { 1 prediction, 2 label, 3 out }
//   dropout_conf           { 1 in, 2 out, 3 noise_shape, 4 seed, 5 rate }
//   bias_add_conf          { 1 a, 2 b, 3 out, 4 axis }
//
// REFERENCE:
//   https://protobuf.dev/programming-guides/encoding/

use std::fs;
use std::path::Path;

use opflow_core::config::{
    BiasAddConf, Conv2dConf, ConvParams, DeconvConf, DropoutConf, InputConf, PoolingConf,
    SoftmaxConf, SparseCrossEntropyConf, VariableConf,
};
use opflow_core::{
    ChannelPosition, DType, Distribution, Error, JobGraph, LogicalBlobId, OpConf, OpKind,
    OperatorConfig, Padding, Result, ScopeHandle, Shape,
};
use tracing::debug;

const WIRE_VARINT: u32 = 0;
const WIRE_FIXED64: u32 = 1;
const WIRE_LEN: u32 = 2;
const WIRE_FIXED32: u32 = 5;

/// Field number of each kind's parameter group inside OperatorConf.
fn conf_field_number(kind: OpKind) -> u32 {
    match kind {
        OpKind::Input => 100,
        OpKind::Variable => 101,
        OpKind::Conv2D => 102,
        OpKind::Deconv2D => 103,
        OpKind::MaxPool2D => 104,
        OpKind::AvgPool2D => 105,
        OpKind::MaxPool3D => 106,
        OpKind::AvgPool3D => 107,
        OpKind::Softmax => 108,
        OpKind::SparseSoftmaxCrossEntropy => 109,
        OpKind::Dropout => 110,
        OpKind::BiasAdd => 111,
    }
}

fn dtype_code(dtype: DType) -> u64 {
    match dtype {
        DType::F32 => 2,
        DType::F64 => 3,
        DType::I8 => 4,
        DType::I32 => 5,
        DType::I64 => 6,
        DType::U8 => 7,
        DType::F16 => 9,
        DType::BF16 => 11,
    }
}

fn dtype_from_code(code: u64) -> Result<DType> {
    match code {
        2 => Ok(DType::F32),
        3 => Ok(DType::F64),
        4 => Ok(DType::I8),
        5 => Ok(DType::I32),
        6 => Ok(DType::I64),
        7 => Ok(DType::U8),
        9 => Ok(DType::F16),
        11 => Ok(DType::BF16),
        _ => Err(Error::Decode(format!("unknown data_type {code}"))),
    }
}

// Minimal protobuf encoder

struct PbEncoder {
    buf: Vec<u8>,
}

impl PbEncoder {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write_varint(&mut self, mut val: u64) {
        loop {
            let byte = (val & 0x7F) as u8;
            val >>= 7;
            if val == 0 {
                self.buf.push(byte);
                break;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Field tag: `field_number << 3 | wire_type`.
    fn write_tag(&mut self, field: u32, wire_type: u32) {
        self.write_varint(((field as u64) << 3) | wire_type as u64);
    }

    fn write_varint_field(&mut self, field: u32, val: u64) {
        self.write_tag(field, WIRE_VARINT);
        self.write_varint(val);
    }

    /// Plain (not zigzag) int64: negative values take ten bytes.
    fn write_int64_field(&mut self, field: u32, val: i64) {
        self.write_varint_field(field, val as u64);
    }

    fn write_bool_field(&mut self, field: u32, val: bool) {
        self.write_varint_field(field, val as u64);
    }

    fn write_double_field(&mut self, field: u32, val: f64) {
        self.write_tag(field, WIRE_FIXED64);
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    fn write_bytes_field(&mut self, field: u32, data: &[u8]) {
        self.write_tag(field, WIRE_LEN);
        self.write_varint(data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    fn write_string_field(&mut self, field: u32, val: &str) {
        self.write_bytes_field(field, val.as_bytes());
    }

    fn write_message_field(&mut self, field: u32, encoder: &PbEncoder) {
        self.write_bytes_field(field, &encoder.buf);
    }

    fn write_packed_field(&mut self, field: u32, values: &[usize]) {
        let mut packed = PbEncoder::new();
        for &v in values {
            packed.write_varint(v as u64);
        }
        self.write_message_field(field, &packed);
    }
}

// Minimal protobuf decoder

struct PbDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PbDecoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| Error::Decode("unexpected end of data".into()))?;
            self.pos += 1;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 63 {
                return Err(Error::Decode("varint too long".into()));
            }
        }
        Ok(result)
    }

    fn read_tag(&mut self) -> Result<(u32, u32)> {
        let val = self.read_varint()?;
        let field = (val >> 3) as u32;
        let wire_type = (val & 0x7) as u32;
        Ok((field, wire_type))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::Decode(format!(
                "field of {len} bytes exceeds the {} remaining",
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = usize::try_from(self.read_varint()?)
            .map_err(|_| Error::Decode("length does not fit in memory".into()))?;
        self.take(len)
    }

    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::Decode("invalid UTF-8 string".into()))
    }

    fn read_double(&mut self) -> Result<f64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    fn read_usize(&mut self) -> Result<usize> {
        to_usize(self.read_varint()?)
    }

    fn read_int64(&mut self) -> Result<i64> {
        Ok(self.read_varint()? as i64)
    }

    /// Append one element (unpacked) or a packed run of a repeated integer field.
    fn read_repeated(&mut self, wire_type: u32, out: &mut Vec<usize>) -> Result<()> {
        match wire_type {
            WIRE_VARINT => out.push(self.read_usize()?),
            WIRE_LEN => {
                let mut packed = PbDecoder::new(self.read_bytes()?);
                while packed.remaining() > 0 {
                    out.push(packed.read_usize()?);
                }
            }
            _ => {
                return Err(Error::Decode(format!(
                    "wire type {wire_type} is not valid for a repeated integer"
                )))
            }
        }
        Ok(())
    }

    fn skip_field(&mut self, wire_type: u32) -> Result<()> {
        match wire_type {
            WIRE_VARINT => {
                self.read_varint()?;
            }
            WIRE_FIXED64 => {
                self.take(8)?;
            }
            WIRE_LEN => {
                self.read_bytes()?;
            }
            WIRE_FIXED32 => {
                self.take(4)?;
            }
            _ => return Err(Error::Decode(format!("unsupported wire type {wire_type}"))),
        }
        Ok(())
    }
}

fn to_usize(v: u64) -> Result<usize> {
    usize::try_from(v).map_err(|_| Error::Decode(format!("{v} does not fit in usize")))
}

fn required<T>(value: Option<T>, message: &str, field: &str) -> Result<T> {
    value.ok_or_else(|| Error::Decode(format!("{message}: missing required field `{field}`")))
}

fn parse_lbi(s: &str) -> Result<LogicalBlobId> {
    s.parse()
        .map_err(|_| Error::Decode(format!("invalid logical blob name \"{s}\"")))
}

fn parse_padding(s: &str) -> Result<Padding> {
    match s {
        "same" => Ok(Padding::Same),
        "valid" => Ok(Padding::Valid),
        _ => Err(Error::Decode(format!("invalid padding \"{s}\""))),
    }
}

fn parse_channel_position(s: &str) -> Result<ChannelPosition> {
    ChannelPosition::from_str_name(s)
        .ok_or_else(|| Error::Decode(format!("invalid data_format \"{s}\"")))
}

// Encoding

fn encode_shape(shape: &Shape) -> PbEncoder {
    let mut enc = PbEncoder::new();
    enc.write_packed_field(1, shape.dims());
    enc
}

fn encode_distribution(distribution: Distribution) -> PbEncoder {
    let mut enc = PbEncoder::new();
    match distribution {
        Distribution::Split(axis) => enc.write_varint_field(1, axis as u64),
        Distribution::Broadcast => enc.write_bytes_field(2, &[]),
        Distribution::PartialSum => enc.write_bytes_field(3, &[]),
    }
    enc
}

fn encode_conv_params(enc: &mut PbEncoder, first: u32, p: &ConvParams) {
    enc.write_string_field(first, p.padding.as_str());
    enc.write_string_field(first + 1, p.data_format.as_str());
    enc.write_packed_field(first + 2, &p.kernel_size);
    enc.write_packed_field(first + 3, &p.strides);
    enc.write_packed_field(first + 4, &p.dilation_rate);
}

fn encode_conf(conf: &OpConf) -> PbEncoder {
    let mut enc = PbEncoder::new();
    match conf {
        OpConf::Input(c) => {
            enc.write_string_field(1, &c.out);
            enc.write_message_field(2, &encode_shape(&c.shape));
            enc.write_varint_field(3, dtype_code(c.data_type));
            enc.write_message_field(4, &encode_distribution(c.distribution));
        }
        OpConf::Variable(c) => {
            enc.write_string_field(1, &c.out);
            enc.write_message_field(2, &encode_shape(&c.shape));
            enc.write_varint_field(3, dtype_code(c.data_type));
        }
        OpConf::Conv2d(c) => {
            enc.write_string_field(1, &c.input.logical_blob_name());
            enc.write_string_field(2, &c.out);
            enc.write_string_field(3, &c.weight.logical_blob_name());
            enc.write_varint_field(4, c.filters as u64);
            encode_conv_params(&mut enc, 5, &c.conv);
            enc.write_bool_field(10, c.use_bias);
        }
        OpConf::Deconv2d(c) => {
            enc.write_string_field(1, &c.input.logical_blob_name());
            enc.write_string_field(2, &c.out);
            enc.write_string_field(3, &c.filter.logical_blob_name());
            enc.write_varint_field(4, c.filters as u64);
            let mut conv = PbEncoder::new();
            encode_conv_params(&mut conv, 1, &c.conv_conf);
            enc.write_message_field(5, &conv);
            enc.write_bool_field(6, c.use_bias);
        }
        OpConf::MaxPool2d(c) | OpConf::AvgPool2d(c) | OpConf::MaxPool3d(c) | OpConf::AvgPool3d(c) => {
            enc.write_string_field(1, &c.input.logical_blob_name());
            enc.write_string_field(2, &c.out);
            enc.write_packed_field(3, &c.pool_size);
            enc.write_packed_field(4, &c.strides);
            enc.write_string_field(5, c.padding.as_str());
            enc.write_string_field(6, c.data_format.as_str());
        }
        OpConf::Softmax(c) => {
            enc.write_string_field(1, &c.input.logical_blob_name());
            enc.write_string_field(2, &c.out);
            enc.write_int64_field(3, c.axis as i64);
        }
        OpConf::SparseCrossEntropy(c) => {
            enc.write_string_field(1, &c.prediction.logical_blob_name());
            enc.write_string_field(2, &c.label.logical_blob_name());
            enc.write_string_field(3, &c.out);
        }
        OpConf::Dropout(c) => {
            enc.write_string_field(1, &c.input.logical_blob_name());
            enc.write_string_field(2, &c.out);
            if let Some(noise) = &c.noise_shape {
                enc.write_message_field(3, &encode_shape(noise));
            }
            if let Some(seed) = c.seed {
                enc.write_int64_field(4, seed);
            }
            enc.write_double_field(5, c.rate);
        }
        OpConf::BiasAdd(c) => {
            enc.write_string_field(1, &c.a.logical_blob_name());
            enc.write_string_field(2, &c.b.logical_blob_name());
            enc.write_string_field(3, &c.out);
            enc.write_int64_field(4, c.axis as i64);
        }
    }
    enc
}

fn encode_op_message(op: &OperatorConfig) -> PbEncoder {
    let mut enc = PbEncoder::new();
    enc.write_string_field(1, &op.name);
    if let Some(id) = op.scope_symbol_id {
        enc.write_int64_field(2, id);
    }
    enc.write_message_field(conf_field_number(op.kind()), &encode_conf(&op.conf));
    enc
}

/// Serialize one operator config as an `OperatorConf` message.
pub fn encode_op(op: &OperatorConfig) -> Vec<u8> {
    encode_op_message(op).into_bytes()
}

/// Serialize a whole job as a `JobProto` message, operators in order.
pub fn encode_job(job: &JobGraph) -> Vec<u8> {
    let mut enc = PbEncoder::new();
    enc.write_string_field(1, job.name());
    enc.write_int64_field(2, job.scope().symbol_id);
    for op in job.ops() {
        enc.write_message_field(3, &encode_op_message(op));
    }
    enc.into_bytes()
}

// Decoding

fn decode_shape(data: &[u8]) -> Result<Shape> {
    let mut dec = PbDecoder::new(data);
    let mut dims = Vec::new();
    while dec.remaining() > 0 {
        let (field, wire_type) = dec.read_tag()?;
        match field {
            1 => dec.read_repeated(wire_type, &mut dims)?,
            _ => dec.skip_field(wire_type)?,
        }
    }
    Ok(Shape::new(dims))
}

fn decode_distribution(data: &[u8]) -> Result<Distribution> {
    let mut dec = PbDecoder::new(data);
    let mut distribution = Distribution::Broadcast;
    while dec.remaining() > 0 {
        let (field, wire_type) = dec.read_tag()?;
        match (field, wire_type) {
            (1, WIRE_VARINT) => distribution = Distribution::Split(dec.read_usize()?),
            (2, WIRE_LEN) => {
                dec.read_bytes()?;
                distribution = Distribution::Broadcast;
            }
            (3, WIRE_LEN) => {
                dec.read_bytes()?;
                distribution = Distribution::PartialSum;
            }
            _ => dec.skip_field(wire_type)?,
        }
    }
    Ok(distribution)
}

/// Fields shared by every parameter group, collected before the kind
/// decides which of them it needs.
#[derive(Default)]
struct RawConf {
    strings: [Option<String>; 7],
    ints: [Option<u64>; 12],
    seqs: [Vec<usize>; 12],
    shape: Option<Shape>,
    dist: Option<Distribution>,
    conv: Option<ConvParams>,
    rate: Option<f64>,
}

impl RawConf {
    fn string(&self, field: u32) -> Option<&str> {
        self.strings.get(field as usize).and_then(|s| s.as_deref())
    }
}

fn decode_conv_params(data: &[u8]) -> Result<ConvParams> {
    let mut dec = PbDecoder::new(data);
    let (mut padding, mut data_format) = (None, None);
    let (mut kernel_size, mut strides, mut dilation_rate) = (Vec::new(), Vec::new(), Vec::new());
    while dec.remaining() > 0 {
        let (field, wire_type) = dec.read_tag()?;
        match (field, wire_type) {
            (1, WIRE_LEN) => padding = Some(parse_padding(&dec.read_string()?)?),
            (2, WIRE_LEN) => data_format = Some(parse_channel_position(&dec.read_string()?)?),
            (3, _) => dec.read_repeated(wire_type, &mut kernel_size)?,
            (4, _) => dec.read_repeated(wire_type, &mut strides)?,
            (5, _) => dec.read_repeated(wire_type, &mut dilation_rate)?,
            _ => dec.skip_field(wire_type)?,
        }
    }
    Ok(ConvParams {
        padding: required(padding, "conv_conf", "padding")?,
        data_format: required(data_format, "conv_conf", "data_format")?,
        kernel_size,
        strides,
        dilation_rate,
    })
}

fn decode_conf(kind: OpKind, data: &[u8]) -> Result<OpConf> {
    let msg = kind.conf_field();
    // Which fields are repeated integers / nested messages depends on the kind.
    let seq_fields: &[u32] = match kind {
        OpKind::Conv2D => &[7, 8, 9],
        OpKind::MaxPool2D | OpKind::AvgPool2D | OpKind::MaxPool3D | OpKind::AvgPool3D => &[3, 4],
        _ => &[],
    };

    let mut raw = RawConf::default();
    let mut dec = PbDecoder::new(data);
    while dec.remaining() > 0 {
        let (field, wire_type) = dec.read_tag()?;
        let slot = field as usize;
        if seq_fields.contains(&field) {
            dec.read_repeated(wire_type, &mut raw.seqs[slot])?;
            continue;
        }
        match (kind, field, wire_type) {
            (OpKind::Input | OpKind::Variable, 2, WIRE_LEN) => {
                raw.shape = Some(decode_shape(dec.read_bytes()?)?)
            }
            (OpKind::Input, 4, WIRE_LEN) => {
                raw.dist = Some(decode_distribution(dec.read_bytes()?)?)
            }
            (OpKind::Dropout, 3, WIRE_LEN) => {
                raw.shape = Some(decode_shape(dec.read_bytes()?)?)
            }
            (OpKind::Deconv2D, 5, WIRE_LEN) => {
                raw.conv = Some(decode_conv_params(dec.read_bytes()?)?)
            }
            (OpKind::Dropout, 5, WIRE_FIXED64) => raw.rate = Some(dec.read_double()?),
            (_, f, WIRE_LEN) if (f as usize) < raw.strings.len() => {
                raw.strings[slot] = Some(dec.read_string()?)
            }
            (_, f, WIRE_VARINT) if (f as usize) < raw.ints.len() => {
                raw.ints[slot] = Some(dec.read_varint()?)
            }
            _ => dec.skip_field(wire_type)?,
        }
    }

    let string = |field: u32, name: &str| -> Result<String> {
        required(raw.string(field), msg, name).map(str::to_string)
    };
    let lbi = |field: u32, name: &str| -> Result<LogicalBlobId> {
        parse_lbi(required(raw.string(field), msg, name)?)
    };
    let int = |field: u32, name: &str| -> Result<u64> { required(raw.ints[field as usize], msg, name) };
    let int32 = |field: u32, name: &str| -> Result<i32> {
        let v = int(field, name)? as i64;
        i32::try_from(v).map_err(|_| Error::Decode(format!("{msg}: `{name}` = {v} does not fit in int32")))
    };
    let dtype = |field: u32| -> Result<DType> { dtype_from_code(int(field, "data_type")?) };
    let padding = |field: u32| -> Result<Padding> { parse_padding(required(raw.string(field), msg, "padding")?) };
    let position = |field: u32| -> Result<ChannelPosition> {
        parse_channel_position(required(raw.string(field), msg, "data_format")?)
    };
    let use_bias = |field: u32| raw.ints[field as usize].unwrap_or(0) != 0;

    let conf = match kind {
        OpKind::Input => OpConf::Input(InputConf {
            out: string(1, "out")?,
            shape: required(raw.shape.clone(), msg, "shape")?,
            data_type: dtype(3)?,
            distribution: raw.dist.unwrap_or_default(),
        }),
        OpKind::Variable => OpConf::Variable(VariableConf {
            out: string(1, "out")?,
            shape: required(raw.shape.clone(), msg, "shape")?,
            data_type: dtype(3)?,
        }),
        OpKind::Conv2D => OpConf::Conv2d(Conv2dConf {
            input: lbi(1, "in")?,
            out: string(2, "out")?,
            weight: lbi(3, "weight")?,
            filters: to_usize(int(4, "filters")?)?,
            conv: ConvParams {
                padding: padding(5)?,
                data_format: position(6)?,
                kernel_size: raw.seqs[7].clone(),
                strides: raw.seqs[8].clone(),
                dilation_rate: raw.seqs[9].clone(),
            },
            use_bias: use_bias(10),
        }),
        OpKind::Deconv2D => OpConf::Deconv2d(DeconvConf {
            input: lbi(1, "in")?,
            out: string(2, "out")?,
            filter: lbi(3, "filter")?,
            filters: to_usize(int(4, "filters")?)?,
            conv_conf: required(raw.conv.clone(), msg, "conv_conf")?,
            use_bias: use_bias(6),
        }),
        OpKind::MaxPool2D | OpKind::AvgPool2D | OpKind::MaxPool3D | OpKind::AvgPool3D => {
            let pooling = PoolingConf {
                input: lbi(1, "in")?,
                out: string(2, "out")?,
                pool_size: raw.seqs[3].clone(),
                strides: raw.seqs[4].clone(),
                padding: padding(5)?,
                data_format: position(6)?,
            };
            match kind {
                OpKind::MaxPool2D => OpConf::MaxPool2d(pooling),
                OpKind::AvgPool2D => OpConf::AvgPool2d(pooling),
                OpKind::MaxPool3D => OpConf::MaxPool3d(pooling),
                _ => OpConf::AvgPool3d(pooling),
            }
        }
        OpKind::Softmax => OpConf::Softmax(SoftmaxConf {
            input: lbi(1, "in")?,
            out: string(2, "out")?,
            axis: int32(3, "axis")?,
        }),
        OpKind::SparseSoftmaxCrossEntropy => OpConf::SparseCrossEntropy(SparseCrossEntropyConf {
            prediction: lbi(1, "prediction")?,
            label: lbi(2, "label")?,
            out: string(3, "out")?,
        }),
        OpKind::Dropout => OpConf::Dropout(DropoutConf {
            input: lbi(1, "in")?,
            out: string(2, "out")?,
            noise_shape: raw.shape.clone(),
            seed: raw.ints[4].map(|v| v as i64),
            rate: required(raw.rate, msg, "rate")?,
        }),
        OpKind::BiasAdd => OpConf::BiasAdd(BiasAddConf {
            a: lbi(1, "a")?,
            b: lbi(2, "b")?,
            out: string(3, "out")?,
            axis: int32(4, "axis")?,
        }),
    };
    Ok(conf)
}

const ALL_KINDS: [OpKind; 12] = [
    OpKind::Input,
    OpKind::Variable,
    OpKind::Conv2D,
    OpKind::Deconv2D,
    OpKind::MaxPool2D,
    OpKind::AvgPool2D,
    OpKind::MaxPool3D,
    OpKind::AvgPool3D,
    OpKind::Softmax,
    OpKind::SparseSoftmaxCrossEntropy,
    OpKind::Dropout,
    OpKind::BiasAdd,
];

fn kind_for_field(field: u32) -> Option<OpKind> {
    ALL_KINDS
        .iter()
        .copied()
        .find(|&k| conf_field_number(k) == field)
}

/// Parse an `OperatorConf` message written by [`encode_op`].
pub fn decode_op(data: &[u8]) -> Result<OperatorConfig> {
    let mut dec = PbDecoder::new(data);
    let mut name = None;
    let mut scope_symbol_id = None;
    let mut conf = None;
    while dec.remaining() > 0 {
        let (field, wire_type) = dec.read_tag()?;
        match (field, wire_type) {
            (1, WIRE_LEN) => name = Some(dec.read_string()?),
            (2, WIRE_VARINT) => scope_symbol_id = Some(dec.read_int64()?),
            (f, WIRE_LEN) => match kind_for_field(f) {
                Some(kind) => {
                    if conf.is_some() {
                        return Err(Error::Decode("OperatorConf carries more than one conf".into()));
                    }
                    conf = Some(decode_conf(kind, dec.read_bytes()?)?);
                }
                None => dec.skip_field(wire_type)?,
            },
            _ => dec.skip_field(wire_type)?,
        }
    }
    Ok(OperatorConfig {
        name: required(name, "OperatorConf", "name")?,
        scope_symbol_id,
        conf: required(conf, "OperatorConf", "conf")?,
    })
}

/// Parse a `JobProto` message written by [`encode_job`].
///
/// Operators are re-added in order, so duplicate names are rejected with
/// [`Error::NameCollision`]. Signatures are not part of the wire format;
/// use `Session::replay` on the result to re-run inference.
pub fn decode_job(data: &[u8]) -> Result<JobGraph> {
    let mut dec = PbDecoder::new(data);
    let mut name = String::new();
    let mut scope = ScopeHandle::default();
    let mut ops = Vec::new();
    while dec.remaining() > 0 {
        let (field, wire_type) = dec.read_tag()?;
        match (field, wire_type) {
            (1, WIRE_LEN) => name = dec.read_string()?,
            (2, WIRE_VARINT) => scope = ScopeHandle::new(dec.read_int64()?),
            (3, WIRE_LEN) => ops.push(decode_op(dec.read_bytes()?)?),
            _ => dec.skip_field(wire_type)?,
        }
    }
    Ok(JobGraph::from_ops(name, ops)?.with_scope(scope))
}

/// Write a job to `path` in protobuf wire format.
pub fn save_job<P: AsRef<Path>>(job: &JobGraph, path: P) -> Result<()> {
    let bytes = encode_job(job);
    fs::write(path.as_ref(), &bytes)
        .map_err(|e| Error::msg(format!("failed to write job file: {e}")))?;
    debug!(job = job.name(), ops = job.len(), bytes = bytes.len(), path = %path.as_ref().display(), "saved job");
    Ok(())
}

/// Read a job written by [`save_job`].
pub fn load_job<P: AsRef<Path>>(path: P) -> Result<JobGraph> {
    let bytes = fs::read(path.as_ref())
        .map_err(|e| Error::msg(format!("failed to read job file: {e}")))?;
    let job = decode_job(&bytes)?;
    debug!(job = job.name(), ops = job.len(), path = %path.as_ref().display(), "loaded job");
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opflow_core::OUT;

    #[test]
    fn test_varint_roundtrip() {
        let mut enc = PbEncoder::new();
        for v in [0u64, 1, 127, 128, 300, 16384, u64::MAX] {
            enc.write_varint(v);
        }
        let mut dec = PbDecoder::new(&enc.buf);
        for v in [0u64, 1, 127, 128, 300, 16384, u64::MAX] {
            assert_eq!(dec.read_varint().unwrap(), v);
        }
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn test_negative_axis_survives() {
        let op = OperatorConfig::new(
            "sm",
            OpConf::Softmax(SoftmaxConf {
                input: LogicalBlobId::new("x", OUT),
                out: OUT.into(),
                axis: -1,
            }),
        );
        let bytes = encode_op(&op);
        assert_eq!(decode_op(&bytes).unwrap(), op);
    }

    #[test]
    fn test_axis_out_of_int32_range() {
        let mut conf = PbEncoder::new();
        conf.write_string_field(1, "x/out");
        conf.write_string_field(2, "out");
        conf.write_int64_field(3, i64::from(i32::MAX) + 1);
        let mut op = PbEncoder::new();
        op.write_string_field(1, "sm");
        op.write_message_field(conf_field_number(OpKind::Softmax), &conf);
        let err = decode_op(&op.into_bytes()).unwrap_err();
        assert!(matches!(err, Error::Decode(ref m) if m.contains("does not fit in int32")));
    }

    #[test]
    fn test_unpacked_repeated_accepted() {
        let mut enc = PbEncoder::new();
        enc.write_string_field(1, "x/out");
        enc.write_string_field(2, "out");
        enc.write_varint_field(3, 2);
        enc.write_varint_field(3, 3);
        enc.write_packed_field(4, &[1, 1]);
        enc.write_string_field(5, "valid");
        enc.write_string_field(6, "channels_first");
        enc.write_varint_field(99, 5);

        let mut op = PbEncoder::new();
        op.write_string_field(1, "pool");
        op.write_message_field(conf_field_number(OpKind::MaxPool2D), &enc);
        let decoded = decode_op(&op.into_bytes()).unwrap();
        match decoded.conf {
            OpConf::MaxPool2d(c) => {
                assert_eq!(c.pool_size, vec![2, 3]);
                assert_eq!(c.strides, vec![1, 1]);
                assert_eq!(c.padding, Padding::Valid);
                assert_eq!(c.data_format, ChannelPosition::ChannelsFirst);
            }
            other => panic!("unexpected conf {other:?}"),
        }
        assert_eq!(decoded.scope_symbol_id, None);
    }

    #[test]
    fn test_truncated_and_malformed() {
        let op = OperatorConfig::new(
            "sm",
            OpConf::Softmax(SoftmaxConf {
                input: LogicalBlobId::new("x", OUT),
                out: OUT.into(),
                axis: 0,
            }),
        );
        let bytes = encode_op(&op);
        let err = decode_op(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        let mut bad_lbi = PbEncoder::new();
        let mut conf = PbEncoder::new();
        conf.write_string_field(1, "no-slash");
        conf.write_string_field(2, "out");
        conf.write_int64_field(3, 0);
        bad_lbi.write_string_field(1, "sm");
        bad_lbi.write_message_field(conf_field_number(OpKind::Softmax), &conf);
        assert!(matches!(decode_op(&bad_lbi.into_bytes()), Err(Error::Decode(_))));

        let mut missing = PbEncoder::new();
        missing.write_string_field(1, "nameless_conf");
        assert!(matches!(decode_op(&missing.into_bytes()), Err(Error::Decode(_))));
    }

    #[test]
    fn test_every_kind_has_a_field() {
        for kind in ALL_KINDS {
            assert_eq!(kind_for_field(conf_field_number(kind)), Some(kind));
        }
        for dtype in [
            DType::F16,
            DType::BF16,
            DType::F32,
            DType::F64,
            DType::I8,
            DType::I32,
            DType::I64,
            DType::U8,
        ] {
            assert_eq!(dtype_from_code(dtype_code(dtype)).unwrap(), dtype);
        }
    }
}
