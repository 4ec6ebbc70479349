//! Generated gRPC/protobuf definitions for the `meridian.v1` package.

tonic::include_proto!("meridian.v1");
