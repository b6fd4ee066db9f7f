use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{loss, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use polars::prelude::*;

use candle_sage::datasets::{MovieLensConfig, MovieLensDataset, RandomSplit};
use candle_sage::eval::{rmse, MeanRatingBaseline};
use candle_sage::nn::{HinSage, LinkRegressor};
use candle_sage::sampling::{examples_from_df, HinSageLinkGenerator, LinkSequence};

// HinSAGE rating regression on MovieLens 100k: bipartite user/movie graph,
// observed ratings as supervised link labels, test RMSE against a per-movie
// mean-rating baseline.
//
// cargo run --example movielens_hinsage

const SEED: u64 = 42;

fn main() -> anyhow::Result<()> {
    let device = Device::Cpu;

    let root = "datasets/ml-100k";
    let config_path = Path::new("datasets/ml-100k-config.json");
    let dataset = if config_path.exists() {
        let config = MovieLensConfig::from_json_file(config_path)?;
        if !Path::new(root).exists() {
            MovieLensDataset::download(root, &config)?;
        }
        MovieLensDataset::load(root, &config)?
    } else {
        MovieLensDataset::new(root)?
    };
    let graph = dataset.to_graph()?;
    println!(
        "MovieLens: {} nodes, {} ratings",
        graph.num_nodes(),
        graph.num_edges()
    );

    let [train_df, test_df] = dataset.random_split([0.8, 0.2], SEED)?;
    let train = examples_from_df(&graph, &train_df, "source", "target", "rating")?;
    let test = examples_from_df(&graph, &test_df, "source", "target", "rating")?;
    println!("{} train ratings, {} test ratings", train.len(), test.len());

    let num_samples = vec![8, 4];
    let generator =
        HinSageLinkGenerator::new(&graph, num_samples.clone(), 200, ("user", "movie"), &device)?;
    let user_chain = generator.type_chain("user");
    let movie_chain = generator.type_chain("movie");

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let hidden_dim = 32;
    let hinsage = HinSage::new(
        &generator.feature_widths(),
        &[hidden_dim, hidden_dim],
        &num_samples,
        &[
            ("user".to_owned(), "movie".to_owned()),
            ("movie".to_owned(), "user".to_owned()),
        ],
        vs.pp("hinsage"),
    )?
    .with_dropout(0.1);
    let head = LinkRegressor::new(hidden_dim, vs.pp("head"))?;

    let mut optimizer = candle_nn::AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: 1e-3,
            ..Default::default()
        },
    )?;
    for epoch in 0..10u64 {
        let sequence = generator.flow(train.clone(), true, SEED + epoch);
        let mut total_loss = 0.0;
        let mut num_batches = 0;
        for batch in sequence {
            let batch = batch?;
            let src = hinsage.forward_t(&batch.src_hops, &user_chain, true)?;
            let dst = hinsage.forward_t(&batch.dst_hops, &movie_chain, true)?;
            let predictions = head.forward(&src, &dst)?;
            let loss = loss::mse(&predictions, &batch.labels)?;
            optimizer.backward_step(&loss)?;
            total_loss += loss.to_scalar::<f32>()?;
            num_batches += 1;
        }
        println!(
            "Epoch: {epoch:2} Train MSE: {:8.5}",
            total_loss / num_batches as f32
        );
    }

    let evaluate = |sequence: LinkSequence| -> anyhow::Result<f32> {
        let mut predictions = Vec::new();
        let mut targets = Vec::new();
        for batch in sequence {
            let batch = batch?;
            let src = hinsage.forward(&batch.src_hops, &user_chain)?;
            let dst = hinsage.forward(&batch.dst_hops, &movie_chain)?;
            predictions.extend(head.forward(&src, &dst)?.to_vec1::<f32>()?);
            targets.extend(batch.labels.to_vec1::<f32>()?);
        }
        Ok(rmse(&predictions, &targets))
    };
    let test_rmse = evaluate(generator.flow(test.clone(), false, SEED))?;

    // the baseline sees the training ratings only
    let train_pairs = rating_pairs(&train_df)?;
    let baseline = MeanRatingBaseline::fit(train_pairs.iter().map(|(m, r)| (m.as_str(), *r)));
    let test_pairs = rating_pairs(&test_df)?;
    let baseline_predictions: Vec<f32> = test_pairs
        .iter()
        .map(|(movie, _)| baseline.predict(movie))
        .collect();
    let baseline_targets: Vec<f32> = test_pairs.iter().map(|(_, r)| *r).collect();
    let baseline_rmse = rmse(&baseline_predictions, &baseline_targets);

    println!("Test RMSE (HinSAGE): {test_rmse:.4}");
    println!("Test RMSE (mean-rating baseline): {baseline_rmse:.4}");
    Ok(())
}

fn rating_pairs(df: &DataFrame) -> anyhow::Result<Vec<(String, f32)>> {
    let movies = df.column("target")?.utf8()?;
    let ratings = df.column("rating")?.f32()?;
    Ok(movies
        .into_no_null_iter()
        .zip(ratings.into_no_null_iter())
        .map(|(movie, rating)| (movie.to_owned(), rating))
        .collect())
}
