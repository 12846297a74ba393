/*!
# Chemical Equipment Datasets

A backend for uploading chemical equipment parameter tables (CSV or XLSX),
summarizing them, and serving the summaries as JSON, chart images and PDF
reports.

## Architecture

### Pipeline
- **loader**: Decodes an upload into a header-normalized table
- **summarizer**: Row count, parameter averages, type distribution and preview
- **upload**: Stages raw bytes, summarizes, stores; cleans up on any failure

### Persistence
- **storage**: Raw uploaded files behind the `BlobStorage` trait
- **store**: Per-owner dataset history, at most five live records per owner
- **saving**: Gzip-compressed JSON snapshots of the store

### Presentation
- **projection**: Chart and report shapes derived from a stored summary
- **graph**: PNG charts drawn with plotters
- **report**: PDF reports laid out with printpdf

### Web
- **login**: Users, sessions and the authentication middleware
- **app**: Routing and handlers
- **config**: Server settings from flags and environment

## REST API Endpoints

- `GET /api/history/` - The caller's five most recent datasets
- `POST /api/upload/` - Upload a CSV or XLSX file (multipart field `file`)
- `GET /api/summary/{id}/` - Stored summary of one dataset
- `GET /api/chart/{id}/` - Chart data; `/api/chart/{id}/{bar,pie,averages}.png` for images
- `GET /api/report/{id}/` - PDF report download
- `GET /api/datasets/{id}/file/` - The originally uploaded file
- `DELETE /api/datasets/{id}/` - Remove a dataset
- `POST /api-auth/login/`, `/api-auth/logout/`, `/api-auth/register/` - Sessions and accounts

With the `web` feature disabled only the pipeline, persistence and
projection layers are built.
*/

pub mod config;
pub mod dataset;
pub mod error;
pub mod loader;
pub mod projection;
pub mod saving;
pub mod storage;
pub mod store;
pub mod summarizer;
pub mod upload;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;
#[cfg(feature = "web")]
pub mod login;
#[cfg(feature = "web")]
pub mod report;

pub use dataset::{DatasetId, DatasetRecord, Owner, Summary};
pub use error::{Error, Result};
pub use store::DatasetStore;
pub use upload::UploadService;
