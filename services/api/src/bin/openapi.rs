//! services/api/src/bin/openapi.rs
//!
//! Prints the OpenAPI specification for the service as JSON, for use in
//! client generation and CI checks.

use api_lib::web::ApiDoc;
use utoipa::OpenApi;

fn main() {
    match ApiDoc::openapi().to_pretty_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("failed to render the OpenAPI spec: {e}");
            std::process::exit(1);
        }
    }
}
