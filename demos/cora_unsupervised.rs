use candle_core::{DType, Device, Tensor, D};
use candle_nn::{loss, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::SeedableRng;

use candle_sage::datasets::CoraDataset;
use candle_sage::eval::{accuracy, extract_embeddings, macro_f1, stratified_split};
use candle_sage::nn::{utils::linear, LinkClassifier, Sage, SageModule};
use candle_sage::sampling::{LinkGenerator, UnsupervisedSampler};

// Unsupervised GraphSAGE on CORA: train node embeddings on random-walk
// positive/negative pairs, then score them with a downstream logistic
// regression over the paper subjects.
//
// cargo run --example cora_unsupervised

const SEED: u64 = 42;

fn main() -> anyhow::Result<()> {
    let device = Device::Cpu;

    let cora = CoraDataset::new("datasets/cora")?;
    let graph = cora.to_graph()?;
    println!(
        "CORA: {} papers, {} citations, {} classes",
        graph.num_nodes(),
        graph.num_edges(),
        cora.num_classes
    );

    let num_samples = vec![10, 5];
    let batch_size = 50;
    let generator = LinkGenerator::new(&graph, num_samples.clone(), batch_size, &device)?;

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let sage = Sage::new(&[generator.feature_width(), 64, 32], &num_samples, vs.pp("sage"))?;
    let head = LinkClassifier;

    let sampler = UnsupervisedSampler::new(5, 1);
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut optimizer = candle_nn::AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: 1e-3,
            ..Default::default()
        },
    )?;

    for epoch in 0..4u64 {
        // fresh walks and negatives every epoch
        let pairs = sampler.pairs(&graph, None, &mut rng);
        let sequence = generator.flow(pairs, true, SEED + epoch);

        let mut total_loss = 0.0;
        let mut num_batches = 0;
        for batch in sequence {
            let batch = batch?;
            let src = sage.forward_t(&batch.src_hops, true)?;
            let dst = sage.forward_t(&batch.dst_hops, true)?;
            let logits = head.forward(&src, &dst)?;
            let loss = loss::binary_cross_entropy_with_logit(&logits, &batch.labels)?;
            optimizer.backward_step(&loss)?;
            total_loss += loss.to_scalar::<f32>()?;
            num_batches += 1;
        }
        println!(
            "Epoch: {epoch:2} Link loss: {:8.5}",
            total_loss / num_batches as f32
        );
    }

    // one deterministic inference pass, every node in table order
    let nodes: Vec<usize> = (0..graph.num_nodes()).collect();
    let embeddings = extract_embeddings(&sage, generator.node_flow(nodes, SEED))?.detach();

    // downstream classifier on the frozen embeddings
    let labels = cora.labels()?;
    let (train_idx, test_idx) = stratified_split(&labels, 0.1, SEED);
    let (train_acc, test_acc, test_f1) = evaluate_embeddings(
        &embeddings,
        &labels,
        &train_idx,
        &test_idx,
        cora.num_classes,
        &device,
    )?;
    println!("Train accuracy: {:5.2}%", 100.0 * train_acc);
    println!(
        "Test accuracy: {:5.2}%  Test macro-F1: {:.4}",
        100.0 * test_acc,
        test_f1
    );
    Ok(())
}

/// Logistic regression over frozen embeddings, the evaluation protocol for
/// unsupervised node representations.
fn evaluate_embeddings(
    embeddings: &Tensor,
    labels: &[u32],
    train_idx: &[usize],
    test_idx: &[usize],
    num_classes: usize,
    device: &Device,
) -> anyhow::Result<(f32, f32, f32)> {
    let select = |idx: &[usize]| -> anyhow::Result<(Tensor, Tensor, Vec<u32>)> {
        let rows: Vec<u32> = idx.iter().map(|&i| i as u32).collect();
        let index = Tensor::from_vec(rows, idx.len(), device)?;
        let xs = embeddings.index_select(&index, 0)?;
        let ys: Vec<u32> = idx.iter().map(|&i| labels[i]).collect();
        let ys_tensor = Tensor::from_vec(ys.clone(), idx.len(), device)?;
        Ok((xs, ys_tensor, ys))
    };
    let (train_x, train_y, train_labels) = select(train_idx)?;
    let (test_x, _, test_labels) = select(test_idx)?;

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let classifier = linear(embeddings.dim(1)?, num_classes, vs.pp("logreg"))?;
    let mut optimizer = candle_nn::AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: 1e-2,
            ..Default::default()
        },
    )?;
    for _ in 0..200 {
        let logits = classifier.forward(&train_x)?;
        let loss = loss::cross_entropy(&logits, &train_y)?;
        optimizer.backward_step(&loss)?;
    }

    let predict = |xs: &Tensor| -> anyhow::Result<Vec<u32>> {
        Ok(classifier
            .forward(xs)?
            .argmax(D::Minus1)?
            .to_dtype(DType::U32)?
            .to_vec1()?)
    };
    let train_pred = predict(&train_x)?;
    let test_pred = predict(&test_x)?;
    Ok((
        accuracy(&train_pred, &train_labels),
        accuracy(&test_pred, &test_labels),
        macro_f1(&test_pred, &test_labels, num_classes),
    ))
}
