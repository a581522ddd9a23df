// Integration tests for the operator constructors
//
// These tests drive whole sessions through the public API: every call goes
// through argument validation, naming, inference and registration.

use opflow::config::ConvParams;
use opflow::prelude::*;
use opflow::{ChannelPosition, OpConf, Padding};

fn conv_params(session: &Session, op_name: &str) -> ConvParams {
    match &session.job().op(op_name).expect("op registered").conf {
        OpConf::Conv2d(c) => c.conv.clone(),
        OpConf::Deconv2d(c) => c.conv_conf.clone(),
        other => panic!("not a convolution: {other:?}"),
    }
}

// Naming

#[test]
fn test_auto_names_distinct_within_session() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![2, 6]))?;
    let a = softmax(&mut s, &x, None, None)?;
    let b = softmax(&mut s, &x, None, None)?;
    assert_ne!(a.op_name(), b.op_name());
    assert_eq!(x.op_name(), "Input_0");
    assert_eq!(a.op_name(), "Softmax_1");
    assert_eq!(b.op_name(), "Softmax_2");
    Ok(())
}

#[test]
fn test_sessions_are_independent() -> opflow::Result<()> {
    let mut first = Session::default();
    let mut second = Session::default();
    input(&mut first, InputArgs::new(vec![1]))?;
    input(&mut first, InputArgs::new(vec![1]))?;
    let y = input(&mut second, InputArgs::new(vec![1]))?;
    assert_eq!(y.op_name(), "Input_0");
    assert_eq!(first.op_count(), 2);
    assert_eq!(second.op_count(), 1);
    Ok(())
}

#[test]
fn test_duplicate_explicit_name_collides() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![2, 6]))?;
    softmax(&mut s, &x, None, Some("probs"))?;
    let err = softmax(&mut s, &x, None, Some("probs")).unwrap_err();
    assert_eq!(err, Error::NameCollision { name: "probs".into() });
    assert_eq!(err.category(), ErrorCategory::NameCollision);
    assert_eq!(s.job().len(), 2);
    Ok(())
}

#[test]
fn test_outputs_expose_identity() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![3, 4]).with_name("data"))?;
    assert_eq!(x.op_name(), "data");
    assert_eq!(x.blob_name(), "out");
    assert_eq!(x.logical_blob_name(), "data/out");
    assert_eq!(x.dtype(), DType::F32);
    Ok(())
}

// Convolution

#[test]
fn test_conv2d_nhwc_same() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![4, 8, 8, 3]))?;
    let w = variable(&mut s, VariableArgs::new(vec![16, 3, 3, 3]))?;
    let y = conv2d(&mut s, &x, &w, Conv2dArgs::new(1usize, "SAME"))?;
    assert_eq!(y.dims(), &[4, 8, 8, 16]);
    assert_eq!(y.op_name(), "Conv2d_2");
    Ok(())
}

#[test]
fn test_conv2d_kernel_follows_layout() -> opflow::Result<()> {
    let mut s = Session::default();
    // [O, kH, kW, I] for NHWC
    let x = input(&mut s, InputArgs::new(vec![1, 9, 9, 2]))?;
    let w = variable(&mut s, VariableArgs::new(vec![4, 3, 5, 2]))?;
    let y = conv2d(&mut s, &x, &w, Conv2dArgs::new(vec![2, 1], "valid"))?;
    let p = conv_params(&s, y.op_name());
    assert_eq!(p.kernel_size, vec![3, 5]);
    assert_eq!(p.data_format, ChannelPosition::ChannelsLast);
    assert_eq!(p.padding, Padding::Valid);
    assert_eq!(y.dims(), &[1, 4, 5, 4]);

    // [O, I, kH, kW] for NCHW
    let xc = input(&mut s, InputArgs::new(vec![1, 2, 9, 9]))?;
    let wc = variable(&mut s, VariableArgs::new(vec![4, 2, 3, 5]))?;
    let yc = conv2d(
        &mut s,
        &xc,
        &wc,
        Conv2dArgs::new(vec![2, 1], "valid").with_data_format("NCHW"),
    )?;
    let pc = conv_params(&s, yc.op_name());
    assert_eq!(pc.kernel_size, p.kernel_size);
    assert_eq!(pc.data_format, ChannelPosition::ChannelsFirst);
    assert_eq!(yc.dims(), &[1, 4, 4, 5]);
    Ok(())
}

#[test]
fn test_conv2d_dilation() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![1, 10, 10, 1]))?;
    let w = variable(&mut s, VariableArgs::new(vec![1, 3, 3, 1]))?;
    let y = conv2d(
        &mut s,
        &x,
        &w,
        Conv2dArgs::new(1usize, "VALID").with_dilations(2usize),
    )?;
    assert_eq!(y.dims(), &[1, 6, 6, 1]);
    assert_eq!(conv_params(&s, y.op_name()).dilation_rate, vec![2, 2]);
    Ok(())
}

#[test]
fn test_conv2d_channel_mismatch_is_inference_error() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![1, 8, 8, 3]))?;
    let w = variable(&mut s, VariableArgs::new(vec![16, 3, 3, 4]))?;
    let err = conv2d(&mut s, &x, &w, Conv2dArgs::new(1usize, "SAME")).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Inference);
    assert_eq!(s.job().len(), 2);
    Ok(())
}

#[test]
fn test_deconv2d_output_shape_unsupported() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![1, 2, 2, 1]))?;
    let w = variable(&mut s, VariableArgs::new(vec![1, 3, 3, 1]))?;
    let args = Deconv2dArgs::new()
        .with_input(&x)
        .with_filters(&w)
        .with_strides(1usize)
        .with_output_shape(vec![1, 2, 2, 1]);
    let err = deconv2d(&mut s, args).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Unsupported);
    assert_eq!(s.job().len(), 2);
    Ok(())
}

#[test]
fn test_deconv2d_nested_conf() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![1, 3, 5, 5]))?;
    let w = variable(&mut s, VariableArgs::new(vec![2, 3, 2, 2]))?;
    let y = deconv2d(
        &mut s,
        Deconv2dArgs::new()
            .with_value(&x)
            .with_filter(&w)
            .with_strides(2usize)
            .with_padding("valid")
            .with_data_format("NCHW"),
    )?;
    assert_eq!(y.dims(), &[1, 2, 10, 10]);
    let p = conv_params(&s, y.op_name());
    assert_eq!(p.kernel_size, vec![2, 2]);
    assert_eq!(p.strides, vec![2, 2]);
    assert_eq!(p.dilation_rate, vec![1, 1]);
    Ok(())
}

// Pooling

#[test]
fn test_max_pool2d_nhwc_valid() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![5, 8, 8, 7]))?;
    let y = max_pool2d(
        &mut s,
        &x,
        PoolArgs::new(2usize, 2usize, "VALID").with_data_format("NHWC"),
    )?;
    assert_eq!(y.dims(), &[5, 4, 4, 7]);
    assert!(y.op_name().starts_with("MaxPool2D_"));
    Ok(())
}

#[test]
fn test_pool_window_length_error() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![1, 8, 8, 1]))?;
    let err = avg_pool2d(&mut s, &x, PoolArgs::new(vec![2, 2, 2], 1usize, "SAME")).unwrap_err();
    assert_eq!(err.to_string(), "ksize should be of length 1 or 2 but was 3");
    assert_eq!(err.category(), ErrorCategory::InvalidParameter);
    Ok(())
}

#[test]
fn test_avg_pool3d_channels_first() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![2, 4, 6, 6, 6]))?;
    let y = avg_pool3d(
        &mut s,
        &x,
        PoolArgs::new(3usize, 3usize, "VALID").with_data_format("ncdhw"),
    )?;
    assert_eq!(y.dims(), &[2, 4, 2, 2, 2]);
    assert!(y.op_name().starts_with("AveragePool3D_"));
    Ok(())
}

// Dropout, bias add, loss

#[test]
fn test_dropout_requires_rate() -> opflow::Result<()> {
    let mut s = Session::default();
    let x = input(&mut s, InputArgs::new(vec![4, 4]))?;
    let err = dropout(&mut s, &x, DropoutArgs::default()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidParameter);
    let y = dropout(&mut s, &x, DropoutArgs::new(0.1).with_seed(3))?;
    assert_eq!(y.op_name(), "Dropout_1");
    assert_eq!(y.dims(), &[4, 4]);
    Ok(())
}

fn op_names(s: &Session) -> Vec<String> {
    s.job().ops().iter().map(|op| op.name.clone()).collect()
}

#[test]
fn test_cross_entropy_name_collision_registers_nothing() -> opflow::Result<()> {
    let mut s = Session::default();
    let logits = input(&mut s, InputArgs::new(vec![4, 3]).with_name("logits"))?;
    let labels = input(
        &mut s,
        InputArgs::new(vec![4]).with_dtype(DType::I32).with_name("loss"),
    )?;
    let before = op_names(&s);

    let err = sparse_softmax_cross_entropy_with_logits(&mut s, &labels, &logits, Some("loss"))
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NameCollision);
    assert_eq!(op_names(&s), before);
    assert_eq!(s.op_count(), 2);
    assert_eq!(s.signatures().len(), 2);
    Ok(())
}

#[test]
fn test_cross_entropy_distribution_mismatch_registers_nothing() -> opflow::Result<()> {
    let mut s = Session::default();
    let logits = input(
        &mut s,
        InputArgs::new(vec![4, 3]).with_distribution(Distribution::Split(0)),
    )?;
    let labels = input(&mut s, InputArgs::new(vec![4]).with_dtype(DType::I64))?;
    let before = op_names(&s);

    let err = sparse_softmax_cross_entropy_with_logits(&mut s, &labels, &logits, None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Inference);
    assert_eq!(op_names(&s), before);
    assert_eq!(s.op_count(), 2);
    Ok(())
}

#[test]
fn test_cross_entropy_foreign_label_registers_nothing() -> opflow::Result<()> {
    let mut s = Session::default();
    let logits = input(&mut s, InputArgs::new(vec![4, 3]))?;
    let mut other = Session::default();
    let labels = input(
        &mut other,
        InputArgs::new(vec![4]).with_dtype(DType::I32).with_name("lbl"),
    )?;

    let err = sparse_softmax_cross_entropy_with_logits(&mut s, &labels, &logits, None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Inference);
    assert_eq!(op_names(&s), vec!["Input_0".to_string()]);
    assert_eq!(s.op_count(), 1);

    // the failed call leaves the session usable
    let labels = input(&mut s, InputArgs::new(vec![4]).with_dtype(DType::I32))?;
    let loss = sparse_softmax_cross_entropy_with_logits(&mut s, &labels, &logits, None)?;
    assert_eq!(loss.dims(), &[4]);
    assert_eq!(s.op_count(), 4);
    Ok(())
}

#[test]
fn test_small_cnn() -> opflow::Result<()> {
    let mut s = Session::new(SessionConfig::default().with_job_name("mnist"));
    let images = input(&mut s, InputArgs::new(vec![32, 28, 28, 1]).with_name("images"))?;
    let labels = input(
        &mut s,
        InputArgs::new(vec![32]).with_dtype(DType::I32).with_name("labels"),
    )?;
    let w1 = variable(&mut s, VariableArgs::new(vec![8, 5, 5, 1]).with_name("w1"))?;
    let b1 = variable(&mut s, VariableArgs::new(vec![8]).with_name("b1"))?;
    let h = conv2d(&mut s, &images, &w1, Conv2dArgs::new(1usize, "VALID"))?;
    let h = bias_add(&mut s, &h, &b1, Some("NHWC"), None)?;
    let h = max_pool2d(&mut s, &h, PoolArgs::new(2usize, 2usize, "VALID"))?;
    assert_eq!(h.dims(), &[32, 12, 12, 8]);
    let h = dropout(&mut s, &h, DropoutArgs::new(0.5))?;

    let w2 = variable(&mut s, VariableArgs::new(vec![10, 12, 12, 8]).with_name("w2"))?;
    let logits = conv2d(&mut s, &h, &w2, Conv2dArgs::new(1usize, "VALID"))?;
    assert_eq!(logits.dims(), &[32, 1, 1, 10]);

    let flat_labels = input(
        &mut s,
        InputArgs::new(vec![32, 1, 1]).with_dtype(DType::I64).with_name("flat_labels"),
    )?;
    let loss = sparse_softmax_cross_entropy_with_logits(&mut s, &flat_labels, &logits, Some("loss"))?;
    assert_eq!(loss.dims(), &[32, 1, 1]);
    assert_eq!(loss.dtype(), DType::F32);
    assert_eq!(labels.dims(), &[32]);

    let job = s.job();
    assert_eq!(job.name(), "mnist");
    assert_eq!(job.ops().last().map(|op| op.name.as_str()), Some("loss"));
    assert_eq!(job.len(), s.signatures().len());
    Ok(())
}
