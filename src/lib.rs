mod advection;
mod animation;
mod boundary;
mod collider;
mod diffusion;
mod error;
mod fdm;
mod field;
mod grid;
mod grid_fluid_solver;
mod grid_system;
mod hash_grid;
mod level_set;
mod linear_solver;
mod mac;
mod parallel;
mod pressure;
mod surface;
mod vec_field;

pub use advection::{back_trace, monotonic_catmull_rom, AdvectionSolver3};
pub use animation::{AnimationClock, Frame, PhysicsAnimation};
pub use boundary::{
    project_and_apply_friction, BlockedBoundaryConditionSolver3, ColliderMarker, DomainFaces,
    FractionalBoundaryConditionSolver3, GridBoundaryConditionSolver3,
};
pub use collider::{
    Collider3, ColliderSet3, ColliderUpdateCallback, ColliderVelocityField3, RigidBodyCollider3,
    RigidBodyMotion,
};
pub use diffusion::{
    BackwardEulerDiffusionSolver3, DiffusionBoundaryType, DiffusionSolverKind,
    ForwardEulerDiffusionSolver3, GridDiffusionSolver3,
};
pub use error::{Result, SimError};
pub use fdm::{
    FdmCompressedLinearSystem3, FdmLinearSystem3, FdmMatrix3, FdmMatrixRow3, LinearOperator,
    MatrixCsr,
};
pub use field::{
    ConstantScalarField3, ConstantVectorField3, CustomScalarField3, CustomVectorField3, DataLayout,
    ScalarField3, ScalarGrid3, VectorField3,
};
pub use grid::{DataGrid3, Size3};
pub use grid_fluid_solver::{
    FluidSdf, GridEmitter3, GridFluidSolver3, GridFluidSolverConfig, SolverStage, StageCallback,
    StageReport,
};
pub use grid_system::{
    GridSystemData3, ScalarLayerMut, VectorGrid3, VectorGridKind, VectorLayerMut, VelocityMut,
};
pub use hash_grid::{PointHashGridSearcher3, PointListSearcher3, PointNeighborSearcher3};
pub use level_set::{
    extrapolate_to_region, fraction_inside, fraction_inside_sdf, is_inside_sdf, reinitialize,
    smeared_heaviside, EPSILON, MAX_DISTANCE,
};
pub use linear_solver::{LinearSolverConfig, LinearSolverKind, LinearSystemSolver};
pub use mac::FaceCenteredGrid3;
pub use pressure::{
    FractionalSinglePhasePressureSolver3, GridPressureSolver3, PressureSolverKind,
    SinglePhasePressureSolver3, MIN_WEIGHT,
};
pub use surface::{Box3, Plane3, Sphere3, Surface3, SurfaceSet3};
pub use vec_field::CollocatedVectorGrid3;
