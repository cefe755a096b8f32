// Numerical gradient checking with central finite differences.
//
// Each layer's analytic backward is compared against a numeric approximation
// of d(loss)/d(input) and d(loss)/d(parameters), where the loss is a fixed
// random linear functional of the layer output. Inputs are kept away from
// non-differentiable points (ReLU kinks, pooling ties).

use grayscale_cnn::layers::{
    softmax, BatchNorm, Conv2D, Dense, MaxPool, Mode, Relu, Softmax,
};
use grayscale_cnn::optimizers::Adam;
use grayscale_cnn::shape::Shape;
use grayscale_cnn::utils::SimpleRng;

const EPS: f32 = 1e-2;

fn close(analytic: f32, numeric: f32) -> bool {
    (analytic - numeric).abs() < 1e-2 + 1e-2 * analytic.abs().max(numeric.abs())
}

fn random_vec(rng: &mut SimpleRng, len: usize, low: f32, high: f32) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range_f32(low, high)).collect()
}

/// Fixed linear functional of the output, so d(loss)/d(output) = probe.
fn probe_loss(output: &[f32], probe: &[f32]) -> f32 {
    let mut total = 0.0f64;
    for i in 0..output.len() {
        total += output[i] as f64 * probe[i] as f64;
    }
    total as f32
}

#[test]
fn test_dense_input_gradient() {
    let mut rng = SimpleRng::new(11);
    let mut layer = Dense::new(3, 2, Adam::default(), &mut rng);
    layer.compile(&Shape::d1(3)).unwrap();

    let batch = 2;
    let input = random_vec(&mut rng, batch * 3, -1.0, 1.0);
    let probe = random_vec(&mut rng, batch * 2, -1.0, 1.0);

    let mut output = vec![0.0f32; batch * 2];
    layer.forward(&input, &mut output, batch, Mode::Train);
    let mut grad_input = vec![0.0f32; batch * 3];
    layer.backward(&probe, &mut grad_input, batch);

    for i in 0..input.len() {
        let mut plus = input.clone();
        plus[i] += EPS;
        layer.forward(&plus, &mut output, batch, Mode::Train);
        let loss_plus = probe_loss(&output, &probe);

        let mut minus = input.clone();
        minus[i] -= EPS;
        layer.forward(&minus, &mut output, batch, Mode::Train);
        let loss_minus = probe_loss(&output, &probe);

        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(
            close(grad_input[i], numeric),
            "input {}: analytic {} vs numeric {}",
            i,
            grad_input[i],
            numeric
        );
    }
}

#[test]
fn test_dense_parameter_gradients() {
    let mut rng = SimpleRng::new(12);
    let mut layer = Dense::new(3, 2, Adam::default(), &mut rng);
    layer.compile(&Shape::d1(3)).unwrap();

    let batch = 2;
    let input = random_vec(&mut rng, batch * 3, -1.0, 1.0);
    let probe = random_vec(&mut rng, batch * 2, -1.0, 1.0);

    let mut output = vec![0.0f32; batch * 2];
    let mut grad_input = vec![0.0f32; batch * 3];
    layer.forward(&input, &mut output, batch, Mode::Train);
    layer.backward(&probe, &mut grad_input, batch);
    let grad_w = layer.weights().grad().to_vec();
    let grad_b = layer.biases().grad().to_vec();

    for i in 0..grad_w.len() {
        layer.weights_mut().values_mut()[i] += EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_plus = probe_loss(&output, &probe);

        layer.weights_mut().values_mut()[i] -= 2.0 * EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_minus = probe_loss(&output, &probe);

        layer.weights_mut().values_mut()[i] += EPS;
        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(close(grad_w[i], numeric), "weight {}", i);
    }

    for i in 0..grad_b.len() {
        layer.biases_mut().values_mut()[i] += EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_plus = probe_loss(&output, &probe);

        layer.biases_mut().values_mut()[i] -= 2.0 * EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_minus = probe_loss(&output, &probe);

        layer.biases_mut().values_mut()[i] += EPS;
        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(close(grad_b[i], numeric), "bias {}", i);
    }
}

#[test]
fn test_conv2d_input_gradient() {
    let mut rng = SimpleRng::new(13);
    let mut layer = Conv2D::new(2, 2, 3, 1, 1, Adam::default(), &mut rng);
    layer.compile(&Shape::d3(2, 4, 4)).unwrap();

    let batch = 2;
    let input = random_vec(&mut rng, batch * 2 * 4 * 4, -1.0, 1.0);
    let probe = random_vec(&mut rng, batch * layer.output_len(), -1.0, 1.0);

    let mut output = vec![0.0f32; batch * layer.output_len()];
    layer.forward(&input, &mut output, batch, Mode::Train);
    let mut grad_input = vec![0.0f32; input.len()];
    layer.backward(&probe, &mut grad_input, batch);

    for i in 0..input.len() {
        let mut plus = input.clone();
        plus[i] += EPS;
        layer.forward(&plus, &mut output, batch, Mode::Train);
        let loss_plus = probe_loss(&output, &probe);

        let mut minus = input.clone();
        minus[i] -= EPS;
        layer.forward(&minus, &mut output, batch, Mode::Train);
        let loss_minus = probe_loss(&output, &probe);

        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(
            close(grad_input[i], numeric),
            "input {}: analytic {} vs numeric {}",
            i,
            grad_input[i],
            numeric
        );
    }
}

#[test]
fn test_conv2d_parameter_gradients() {
    let mut rng = SimpleRng::new(14);
    let mut layer = Conv2D::new(1, 2, 3, 1, 1, Adam::default(), &mut rng);
    layer.compile(&Shape::d3(1, 4, 4)).unwrap();

    let batch = 2;
    let input = random_vec(&mut rng, batch * 16, -1.0, 1.0);
    let probe = random_vec(&mut rng, batch * layer.output_len(), -1.0, 1.0);

    let mut output = vec![0.0f32; batch * layer.output_len()];
    let mut grad_input = vec![0.0f32; input.len()];
    layer.forward(&input, &mut output, batch, Mode::Train);
    layer.backward(&probe, &mut grad_input, batch);
    let grad_k = layer.kernels().grad().to_vec();
    let grad_b = layer.biases().grad().to_vec();

    for i in 0..grad_k.len() {
        layer.kernels_mut().values_mut()[i] += EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_plus = probe_loss(&output, &probe);

        layer.kernels_mut().values_mut()[i] -= 2.0 * EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_minus = probe_loss(&output, &probe);

        layer.kernels_mut().values_mut()[i] += EPS;
        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(close(grad_k[i], numeric), "kernel {}", i);
    }

    for i in 0..grad_b.len() {
        layer.biases_mut().values_mut()[i] += EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_plus = probe_loss(&output, &probe);

        layer.biases_mut().values_mut()[i] -= 2.0 * EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_minus = probe_loss(&output, &probe);

        layer.biases_mut().values_mut()[i] += EPS;
        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(close(grad_b[i], numeric), "bias {}", i);
    }
}

#[test]
fn test_batchnorm_input_gradient() {
    let mut rng = SimpleRng::new(15);
    let mut layer = BatchNorm::new(1e-5, 0.9);
    layer.compile(&Shape::d1(3)).unwrap();

    let batch = 4;
    let input = random_vec(&mut rng, batch * 3, -2.0, 2.0);
    let probe = random_vec(&mut rng, batch * 3, -1.0, 1.0);

    let mut output = vec![0.0f32; batch * 3];
    layer.forward(&input, &mut output, batch, Mode::Train);
    let mut grad_input = vec![0.0f32; batch * 3];
    layer.backward(&probe, &mut grad_input, batch);

    // The analytic gradient accounts for each input's effect on the batch
    // statistics; the numeric check must see the same effect, so the full
    // training-mode forward is re-run per perturbation.
    for i in 0..input.len() {
        let mut plus = input.clone();
        plus[i] += EPS;
        layer.forward(&plus, &mut output, batch, Mode::Train);
        let loss_plus = probe_loss(&output, &probe);

        let mut minus = input.clone();
        minus[i] -= EPS;
        layer.forward(&minus, &mut output, batch, Mode::Train);
        let loss_minus = probe_loss(&output, &probe);

        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(
            close(grad_input[i], numeric),
            "input {}: analytic {} vs numeric {}",
            i,
            grad_input[i],
            numeric
        );
    }
}

#[test]
fn test_batchnorm_scale_shift_gradients() {
    let mut rng = SimpleRng::new(16);
    let mut layer = BatchNorm::new(1e-5, 0.9);
    layer.compile(&Shape::d1(2)).unwrap();
    layer.gamma_mut().set_values(&[1.3, 0.7]);
    layer.beta_mut().set_values(&[0.2, -0.4]);

    let batch = 4;
    let input = random_vec(&mut rng, batch * 2, -2.0, 2.0);
    let probe = random_vec(&mut rng, batch * 2, -1.0, 1.0);

    let mut output = vec![0.0f32; batch * 2];
    let mut grad_input = vec![0.0f32; batch * 2];
    layer.forward(&input, &mut output, batch, Mode::Train);
    layer.backward(&probe, &mut grad_input, batch);
    let grad_gamma = layer.gamma().grad().to_vec();
    let grad_beta = layer.beta().grad().to_vec();

    for c in 0..2 {
        layer.gamma_mut().values_mut()[c] += EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_plus = probe_loss(&output, &probe);

        layer.gamma_mut().values_mut()[c] -= 2.0 * EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_minus = probe_loss(&output, &probe);

        layer.gamma_mut().values_mut()[c] += EPS;
        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(close(grad_gamma[c], numeric), "gamma {}", c);
    }

    for c in 0..2 {
        layer.beta_mut().values_mut()[c] += EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_plus = probe_loss(&output, &probe);

        layer.beta_mut().values_mut()[c] -= 2.0 * EPS;
        layer.forward(&input, &mut output, batch, Mode::Train);
        let loss_minus = probe_loss(&output, &probe);

        layer.beta_mut().values_mut()[c] += EPS;
        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(close(grad_beta[c], numeric), "beta {}", c);
    }
}

#[test]
fn test_relu_input_gradient() {
    let mut rng = SimpleRng::new(17);
    let mut layer = Relu::new();
    layer.compile(&Shape::d1(6)).unwrap();

    // Keep inputs away from the kink at zero.
    let input: Vec<f32> = (0..12)
        .map(|_| {
            let magnitude = rng.gen_range_f32(0.5, 1.5);
            if rng.next_f32() < 0.5 {
                -magnitude
            } else {
                magnitude
            }
        })
        .collect();
    let probe = random_vec(&mut rng, 12, -1.0, 1.0);

    let mut output = vec![0.0f32; 12];
    layer.forward(&input, &mut output, 2, Mode::Train);
    let mut grad_input = vec![0.0f32; 12];
    layer.backward(&probe, &mut grad_input, 2);

    for i in 0..input.len() {
        let mut plus = input.clone();
        plus[i] += EPS;
        layer.forward(&plus, &mut output, 2, Mode::Train);
        let loss_plus = probe_loss(&output, &probe);

        let mut minus = input.clone();
        minus[i] -= EPS;
        layer.forward(&minus, &mut output, 2, Mode::Train);
        let loss_minus = probe_loss(&output, &probe);

        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(close(grad_input[i], numeric), "input {}", i);
    }
}

#[test]
fn test_maxpool_input_gradient() {
    let mut layer = MaxPool::new(2);
    layer.compile(&Shape::d3(1, 4, 4)).unwrap();

    // Strictly increasing values so no perturbation can flip an argmax.
    let input: Vec<f32> = (0..16).map(|i| i as f32 * 0.5).collect();
    let mut rng = SimpleRng::new(18);
    let probe = random_vec(&mut rng, 4, -1.0, 1.0);

    let mut output = vec![0.0f32; 4];
    layer.forward(&input, &mut output, 1, Mode::Train);
    let mut grad_input = vec![0.0f32; 16];
    layer.backward(&probe, &mut grad_input, 1);

    for i in 0..input.len() {
        let mut plus = input.clone();
        plus[i] += EPS;
        layer.forward(&plus, &mut output, 1, Mode::Train);
        let loss_plus = probe_loss(&output, &probe);

        let mut minus = input.clone();
        minus[i] -= EPS;
        layer.forward(&minus, &mut output, 1, Mode::Train);
        let loss_minus = probe_loss(&output, &probe);

        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(close(grad_input[i], numeric), "input {}", i);
    }
}

#[test]
fn test_softmax_cross_entropy_gradient() {
    let mut rng = SimpleRng::new(19);
    let mut layer = Softmax::new();
    layer.compile(&Shape::d1(4)).unwrap();

    let batch = 3;
    let classes = 4;
    let logits = random_vec(&mut rng, batch * classes, -2.0, 2.0);
    let labels: Vec<u8> = vec![0, 2, 3];

    // Analytic fused gradient at the logits: (probs - onehot) / batch.
    let mut probs = vec![0.0f32; batch * classes];
    layer.forward(&logits, &mut probs, batch, Mode::Train);
    let mut analytic = probs.clone();
    let scale = 1.0 / batch as f32;
    for a in &mut analytic {
        *a *= scale;
    }
    for (row, &label) in labels.iter().enumerate() {
        analytic[row * classes + label as usize] -= scale;
    }

    let mut loss_at = |logits: &[f32]| {
        let mut out = vec![0.0f32; batch * classes];
        layer.forward(logits, &mut out, batch, Mode::Train);
        softmax::cross_entropy(&out, &labels, classes)
    };

    for i in 0..logits.len() {
        let mut plus = logits.clone();
        plus[i] += EPS;
        let loss_plus = loss_at(&plus);

        let mut minus = logits.clone();
        minus[i] -= EPS;
        let loss_minus = loss_at(&minus);

        let numeric = (loss_plus - loss_minus) / (2.0 * EPS);
        assert!(
            close(analytic[i], numeric),
            "logit {}: analytic {} vs numeric {}",
            i,
            analytic[i],
            numeric
        );
    }
}
