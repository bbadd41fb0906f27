//! Contract bindings

#![allow(clippy::too_many_arguments)]

use alloy::sol;

// Generate contract bindings
sol! {
    #[sol(rpc)]
    interface IPdMSystemHybrid {
        event SensorDataProofSubmitted(
            uint256 indexed proofId,
            uint256 indexed machineId,
            bytes32 dataHash,
            address submitter
        );

        event PredictionProofSubmitted(
            uint256 indexed proofId,
            uint256 indexed dataProofId,
            bytes32 predictionHash,
            address predictor
        );

        function submitSensorDataProof(
            uint256 machineId,
            bytes32 dataHash,
            bytes32 commitmentHash,
            bytes32 storageLocation,
            uint256 sensorCount,
            uint256[2] a,
            uint256[2][2] b,
            uint256[2] c,
            uint256[] publicInputs
        ) external returns (uint256 proofId);

        function submitPredictionProof(
            uint256 dataProofId,
            bytes32 predictionHash,
            bytes32 modelCommitment,
            uint256 prediction,
            uint256 confidence,
            uint256[2] a,
            uint256[2][2] b,
            uint256[2] c,
            uint256[] publicInputs
        ) external returns (uint256 proofId);

        function usedDataHashes(bytes32 dataHash) external view returns (bool);

        function accessRegistry() external view returns (address);

        function SENSOR_DATA_RESOURCE() external view returns (bytes32);

        function PREDICTION_RESOURCE() external view returns (bytes32);
    }
}

sol! {
    #[sol(rpc)]
    interface IUnifiedGroth16Verifier {
        struct G1Point {
            uint256 X;
            uint256 Y;
        }

        struct G2Point {
            uint256[2] X;
            uint256[2] Y;
        }

        struct DynVK {
            G1Point alpha;
            G2Point beta;
            G2Point gamma;
            G2Point delta;
            G1Point[] IC;
            bool isSet;
        }

        function circuitKeys(uint8 circuitType) external view returns (DynVK memory);

        function setCircuitVerifyingKey(
            uint8 circuitType,
            G1Point alpha,
            G2Point beta,
            G2Point gamma,
            G2Point delta,
            G1Point[] IC
        ) external;
    }
}

sol! {
    #[sol(rpc)]
    interface IAccessControlRegistry {
        function checkAccess(
            address account,
            bytes32 resource,
            uint8 level
        ) external view returns (bool hasAccess, string reason);
    }
}
