//! Logistic regression model plug-in.
//!
//! Grounded on
//! `original_source/stages/model/plugins/modelPluginDefault.py`
//! (per-type model dict, 80/20 held-out split, retrain only on strict
//! score improvement). spec.md §1 marks the concrete algorithm out of
//! scope — this is a minimal dependency-free gradient-descent
//! implementation; only the lifecycle it's plugged into is specified.

use super::{ModelPlugin, TrainingExample};
use crate::error::PluginError;
use serde::{Deserialize, Serialize};

const LEARNING_RATE: f64 = 0.1;
const EPOCHS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    weights: Vec<f64>,
    bias: f64,
    feature_order: Vec<String>,
    trained: bool,
    validation_score: f64,
}

impl Default for LogisticModel {
    fn default() -> Self {
        Self {
            weights: Vec::new(),
            bias: 0.0,
            feature_order: Vec::new(),
            trained: false,
            validation_score: 0.0,
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn vectorize(example: &TrainingExample, feature_order: &[String]) -> Vec<f64> {
    feature_order
        .iter()
        .map(|name| example.features.get(name).and_then(|v| v.as_f64()).unwrap_or(0.0))
        .collect()
}

fn feature_order_from(rows: &[TrainingExample]) -> Vec<String> {
    let mut names: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for row in rows {
        for (k, v) in &row.features {
            if v.as_f64().is_some() {
                names.insert(k.clone());
            }
        }
    }
    names.into_iter().collect()
}

fn fit(weights: &mut [f64], bias: &mut f64, xs: &[Vec<f64>], ys: &[u8]) {
    let n = xs.len().max(1) as f64;
    for _ in 0..EPOCHS {
        let mut grad_w = vec![0.0; weights.len()];
        let mut grad_b = 0.0;
        for (x, &y) in xs.iter().zip(ys) {
            let z: f64 = weights.iter().zip(x).map(|(w, xi)| w * xi).sum::<f64>() + *bias;
            let prediction = sigmoid(z);
            let error = prediction - y as f64;
            for (g, xi) in grad_w.iter_mut().zip(x) {
                *g += error * xi;
            }
            grad_b += error;
        }
        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= LEARNING_RATE * g / n;
        }
        *bias -= LEARNING_RATE * grad_b / n;
    }
}

fn score(weights: &[f64], bias: f64, xs: &[Vec<f64>], ys: &[u8]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let correct = xs
        .iter()
        .zip(ys)
        .filter(|(x, &y)| {
            let z: f64 = weights.iter().zip(*x).map(|(w, xi)| w * xi).sum::<f64>() + bias;
            let predicted_label = if sigmoid(z) >= 0.5 { 1 } else { 0 };
            predicted_label == y
        })
        .count();
    correct as f64 / xs.len() as f64
}

impl ModelPlugin for LogisticModel {
    fn name(&self) -> &str {
        "Logistic Regression Model Plugin"
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn train(&mut self, rows: &[TrainingExample], split: f64) -> Option<f64> {
        let feature_order = feature_order_from(rows);
        let vectors: Vec<(Vec<f64>, u8)> = rows
            .iter()
            .map(|r| (vectorize(r, &feature_order), r.label))
            .collect();

        let split_at = ((vectors.len() as f64) * (1.0 - split)).round() as usize;
        let split_at = split_at.clamp(1, vectors.len().saturating_sub(1).max(1));
        let (train_set, valid_set) = vectors.split_at(split_at);
        if train_set.is_empty() || valid_set.is_empty() {
            return None;
        }

        let (train_x, train_y): (Vec<_>, Vec<_>) = train_set.iter().cloned().unzip();
        let (valid_x, valid_y): (Vec<_>, Vec<_>) = valid_set.iter().cloned().unzip();

        let mut weights = vec![0.0; feature_order.len()];
        let mut bias = 0.0;
        fit(&mut weights, &mut bias, &train_x, &train_y);
        let validation_score = score(&weights, bias, &valid_x, &valid_y);

        if validation_score > self.validation_score || !self.trained {
            self.weights = weights;
            self.bias = bias;
            self.feature_order = feature_order;
            self.trained = true;
            self.validation_score = validation_score;
            Some(validation_score)
        } else {
            None
        }
    }

    fn predict(&self, features: &crate::dto::FeatureMap) -> Result<(u8, f64), PluginError> {
        if !self.trained {
            return Ok((1, 1.0));
        }
        let x: Vec<f64> = self
            .feature_order
            .iter()
            .map(|name| features.get(name).and_then(|v| v.as_f64()).unwrap_or(0.0))
            .collect();
        let z: f64 = self.weights.iter().zip(&x).map(|(w, xi)| w * xi).sum::<f64>() + self.bias;
        let p = sigmoid(z);
        let label = if p >= 0.5 { 1 } else { 0 };
        Ok((label, p))
    }
}
