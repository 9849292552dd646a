//! Holon zero-knowledge collaborator placeholder.
//!
//! Groth16 proof generation/verification over `ark-bn254`, intended as an
//! alternate `VmCollaborator`-adjacent proving backend; not implemented in
//! this pass.

// TODO: Groth16 circuit definitions and prove/verify entry points.
