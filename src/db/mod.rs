// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Database access module
//
// Trait seams for the source (query) and target (write) interfaces plus
// the InfluxDB 1.x HTTP implementation. The run loops only ever see the
// traits.

pub mod http;
pub mod interface;

pub use http::HttpDatabase;
pub use interface::{
    FieldKind, FieldTypes, RowPage, RowStream, SourceDatabase, TargetDatabase,
};
