//! Double-encoding detector.
//!
//! Grounded on
//! `original_source/stages/filter/plugins/filterPluginDoubleEncoding.py`:
//! acquisition already URL-decodes the query (and POST body) once before
//! the pipeline runs (spec.md §4.2); if decoding it *again* here produces a
//! different string, the sender encoded it twice — reject.

use super::FilterPlugin;
use crate::error::PluginError;
use crate::message::HttpMessage;
use percent_encoding::percent_decode_str;

pub struct DoubleEncodingFilterPlugin;

impl FilterPlugin for DoubleEncodingFilterPlugin {
    fn name(&self) -> &str {
        "Double Encoding Filter Plugin"
    }

    fn filter_request(&self, message: &HttpMessage) -> Result<Option<(String, String)>, PluginError> {
        if message.has_query() && double_decodes(&message.query) {
            return Ok(Some((
                "Double Encoded Path Query detected".to_string(),
                self.name().to_string(),
            )));
        }
        if message.has_body() {
            let body = message.body_as_str();
            if double_decodes(&body) {
                return Ok(Some((
                    "Double Encoded Path Query detected".to_string(),
                    self.name().to_string(),
                )));
            }
        }
        Ok(None)
    }
}

fn double_decodes(s: &str) -> bool {
    match percent_decode_str(s).decode_utf8() {
        Ok(decoded) => decoded.as_ref() != s,
        // An invalid sequence after a second decode pass is itself a sign
        // the first decode didn't leave well-formed input; treat as reject.
        Err(_) => true,
    }
}
